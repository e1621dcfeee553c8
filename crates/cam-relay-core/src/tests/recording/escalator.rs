#![cfg(unix)]

use crate::{ShutdownEscalator, ShutdownOutcome};

use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

#[allow(clippy::unwrap_used)]
fn spawn_sh(script: &str) -> Child {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

fn escalator() -> ShutdownEscalator {
    ShutdownEscalator::new(Duration::from_millis(300), Duration::from_secs(2))
}

/// WHAT: A process that exits on SIGINT ends gracefully
/// WHY: Encoders must get a chance to finalize their container
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_cooperative_process_when_shutting_down_then_graceful() {
    // Given
    let mut child = spawn_sh("trap 'exit 0' INT; while :; do sleep 0.05; done");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // When
    let outcome = escalator().shutdown(&mut child).await.unwrap();

    // Then
    assert!(matches!(outcome, ShutdownOutcome::Graceful(status) if status.success()));
}

/// WHAT: A process that ignores SIGINT is killed after the grace period
/// WHY: Stop must finish within a known bound
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_stubborn_process_when_shutting_down_then_forced_within_bound() {
    // Given
    let mut child = spawn_sh("trap '' INT; while :; do sleep 0.05; done");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let escalator = escalator();

    // When
    let started = Instant::now();
    let outcome = escalator.shutdown(&mut child).await.unwrap();

    // Then
    assert!(matches!(outcome, ShutdownOutcome::Forced(Some(_))));
    assert!(started.elapsed() < escalator.bound() + Duration::from_millis(500));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

/// WHAT: An exited process is reported without signalling
/// WHY: Escalation must be idempotent against natural exit
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_exited_process_when_shutting_down_then_already_exited() {
    // Given
    let mut child = spawn_sh("exit 3");
    let status = child.wait().await.unwrap();

    // When
    let outcome = escalator().shutdown(&mut child).await.unwrap();
    let again = escalator().shutdown(&mut child).await.unwrap();

    // Then
    assert_eq!(outcome, ShutdownOutcome::AlreadyExited(status));
    assert_eq!(again, outcome);
    assert_eq!(outcome.exit_status().and_then(|s| s.code()), Some(3));
    assert_eq!(outcome.label(), "already_exited");
}
