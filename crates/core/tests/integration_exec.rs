//! Integration tests for command execution: timeout enforcement, environment
//! isolation, and cooperative cancellation against real child processes.

#![cfg(unix)]

use bosun_core::exec::{CommandExecutor, ExecRequest};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_timeout_kills_long_running_command_promptly() {
    let executor = CommandExecutor::new();
    let request = ExecRequest::new("sh")
        .with_args(["-c", "echo before; exec sleep 10"])
        .with_timeout(Duration::from_millis(100));

    let outcome = executor.execute(&request).await.unwrap();

    assert!(outcome.timed_out);
    assert!(!outcome.success);
    assert!(!outcome.stopped);
    // killed at the deadline, not after the sleep finished
    assert!(
        outcome.elapsed < Duration::from_secs(2),
        "took {:?}",
        outcome.elapsed
    );
    assert!(outcome.output.contains("before"));
    assert!(outcome.output.contains("### command timed out after 0s"));
}

#[tokio::test]
async fn test_ambient_environment_is_stripped_unless_whitelisted() {
    std::env::set_var("BOSUN_AMBIENT_SECRET", "do-not-leak");

    let executor = CommandExecutor::new();
    let request = ExecRequest::new("env")
        .with_whitelist_env(["PATH"])
        .with_env("DEPLOY_REFERENCE", "v1.2.3");

    let outcome = executor.execute(&request).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.output.contains("PATH="));
    assert!(outcome.output.contains("DEPLOY_REFERENCE=v1.2.3"));
    assert!(
        !outcome.output.contains("BOSUN_AMBIENT_SECRET"),
        "ambient variable leaked into child: {}",
        outcome.output
    );
}

#[tokio::test]
async fn test_cancellation_kills_running_command() {
    let request = ExecRequest::new("sh").with_args(["-c", "echo started; exec sleep 10"]);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = tokio::spawn(async move {
        CommandExecutor::new()
            .execute_with_cancel(&request, cancel_rx)
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel_tx.send(true).unwrap();

    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.stopped);
    assert!(!outcome.success);
    assert!(outcome.elapsed < Duration::from_secs(3));
    assert!(outcome.output.contains("started"));
    assert!(outcome.output.contains("### command stopped"));
}

#[tokio::test]
async fn test_working_directory_applies_to_child() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = std::fs::canonicalize(dir.path()).unwrap();

    let executor = CommandExecutor::new();
    let request = ExecRequest::new("pwd").with_cwd(dir.path());

    let outcome = executor.execute(&request).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.output.contains(&canonical.display().to_string()));
}
