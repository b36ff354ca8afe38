//! Test: Timeouts - an attempt that overruns its stage timeout counts as a failure

use crate::helpers::*;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_timed_out_attempt_is_retried() {
    let slow = ScriptedAction::new(vec![Step::Hang(Duration::from_secs(10)), Step::Succeed]);
    let restore = stage("restore", slow.clone(), 2).with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let (run, _sink) = run_stages(vec![restore]).await;

    assert_run_succeeded(&run);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(details(&run, "restore"), vec![Some("timeout".to_string()), None]);
    assert!(!run.attempts()[0].outcome.success);
    assert_eq!(slow.prechecks(), 1);
}

#[tokio::test]
async fn test_timeout_on_last_attempt_fails_stage() {
    let slow = ScriptedAction::new(vec![Step::Hang(Duration::from_secs(10))]);
    let restore = stage("restore", slow, 1).with_timeout(Duration::from_millis(50));

    let (run, _sink) = run_stages(vec![restore, stage("after", ScriptedAction::ok(), 1)]).await;

    assert_run_failed_at(&run, "restore");
    assert_eq!(run.failure.as_ref().unwrap().last_error, "timeout");
    assert!(run.attempts_for("after").next().is_none());
}

#[tokio::test]
async fn test_attempt_duration_bounded_by_timeout() {
    let slow = ScriptedAction::new(vec![Step::Hang(Duration::from_secs(10))]);
    let restore = stage("restore", slow, 1).with_timeout(Duration::from_millis(50));

    let (run, _sink) = run_stages(vec![restore]).await;

    let record = &run.attempts()[0];
    assert!(record.duration() >= Duration::from_millis(50));
    assert!(record.duration() < Duration::from_secs(5));
}
