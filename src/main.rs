use curtail::{cli, logging, run, Shutdown};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(Shutdown::Completed) => 0,
        Ok(Shutdown::GraceExceeded) => {
            tracing::warn!("abandoning unfinished cleanup");
            0
        }
        Err(err) => {
            eprintln!("curtail error: {err:?}");
            1
        }
    };

    // Exit without dropping the runtime: dropping it waits on any blocking
    // I/O still parked in its pool, with no upper bound.
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<Shutdown> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
