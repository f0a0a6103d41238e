mod common;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use common::*;
use curtail::{MemorySink, RotationSupervisor, Shutdown, ShutdownCoordinator};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn test_graceful_shutdown_releases_sessions() {
    let tmp_dir = tempdir().unwrap();
    let dir = tmp_dir.path().canonicalize().unwrap();
    let app = dir.join("app.log");
    write_with_mtime(&app, "before\n", SystemTime::now());

    let sink = MemorySink::new();
    let (tx, mut rotations) = mpsc::unbounded_channel();
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(2));
    let supervisor = RotationSupervisor::new(&dir, Arc::new(sink.clone())).on_rotate(tx);

    let driver = coordinator.clone();
    let token = coordinator.token();
    let handle = tokio::spawn(async move { driver.drive(supervisor.supervise(token)).await });

    timeout(WAIT, rotations.recv()).await.unwrap().unwrap();
    wait_for_lines(&sink, 1).await;
    #[cfg(target_os = "linux")]
    assert!(open_handles(&app) > 0);

    let started = Instant::now();
    assert!(coordinator.trigger());
    let res = timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(res.unwrap(), Shutdown::Completed);
    assert!(started.elapsed() < coordinator.grace());

    // The follower closed its handle before supervise returned.
    #[cfg(target_os = "linux")]
    assert_eq!(open_handles(&app), 0);

    // Nothing is following the file any more.
    append(&app, "after\n");
    settle().await;
    assert_eq!(sink.lines(), vec!["before"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_triggers_shut_down_once() {
    let tmp_dir = tempdir().unwrap();
    let dir = tmp_dir.path().canonicalize().unwrap();
    std::fs::write(dir.join("app.log"), "x\n").unwrap();

    let sink = MemorySink::new();
    let coordinator = ShutdownCoordinator::default();
    let supervisor = RotationSupervisor::new(&dir, Arc::new(sink.clone()));

    let driver = coordinator.clone();
    let token = coordinator.token();
    let handle = tokio::spawn(async move { driver.drive(supervisor.supervise(token)).await });
    wait_for_lines(&sink, 1).await;

    let triggers: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.trigger() })
        })
        .collect();

    let mut started = 0;
    for trigger in triggers {
        if trigger.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    let res = timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(res.unwrap(), Shutdown::Completed);
    assert!(coordinator.is_triggered());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_while_idle() {
    let tmp_dir = tempdir().unwrap();

    let coordinator = ShutdownCoordinator::default();
    let supervisor = RotationSupervisor::new(tmp_dir.path(), Arc::new(MemorySink::new()));

    let driver = coordinator.clone();
    let token = coordinator.token();
    let handle = tokio::spawn(async move { driver.drive(supervisor.supervise(token)).await });

    settle().await;
    coordinator.trigger();

    let res = timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(res.unwrap(), Shutdown::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fatal_error_surfaces_through_drive() {
    let tmp_dir = tempdir().unwrap();

    let coordinator = ShutdownCoordinator::default();
    let supervisor = RotationSupervisor::new(
        tmp_dir.path().join("missing"),
        Arc::new(MemorySink::new()),
    );

    let err = coordinator
        .drive(supervisor.supervise(coordinator.token()))
        .await
        .unwrap_err();
    assert!(err.is_directory_lost());
    assert!(!coordinator.is_triggered());
}
