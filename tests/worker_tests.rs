use std::time::{Duration, Instant};

use kickoff::worker::TaskProcess;

#[tokio::test]
async fn test_process_success_exit() {
    let mut process = TaskProcess::spawn("true").expect("spawn");
    let status = process.wait().await.expect("wait");
    assert!(status.success());
}

#[tokio::test]
async fn test_process_failure_exit_code() {
    let mut process = TaskProcess::spawn("exit 3").expect("spawn");
    let status = process.wait().await.expect("wait");
    assert_eq!(status.code(), Some(3));
}

#[tokio::test]
async fn test_process_unknown_command_fails() {
    // `sh -c` itself spawns fine; the failure shows up in the exit status.
    let mut process = TaskProcess::spawn("kickoff_no_such_command_12345").expect("spawn");
    let status = process.wait().await.expect("wait");
    assert!(!status.success());
}

#[tokio::test]
async fn test_terminate_kills_long_running_process() {
    let mut process = TaskProcess::spawn("sleep 30").expect("spawn");
    let started = Instant::now();

    let status = process.terminate().await.expect("terminate");
    assert!(!status.success());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "terminate did not interrupt the sleep"
    );
}
