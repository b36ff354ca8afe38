//! Test: Cancellation - a raised cancel flag stops the run at the next boundary

use crate::helpers::*;
use bak2cloud::core::{CancelFlag, Pipeline, RunStatus};
use bak2cloud::execution::PipelineRunner;
use bak2cloud::persistence::AuditLog;

#[tokio::test]
async fn test_cancel_stops_before_next_stage() {
    let b = ScriptedAction::ok();

    let (run, sink) = run_stages(vec![
        stage("a", ScriptedAction::new(vec![Step::CancelRun]), 1),
        stage("b", b.clone(), 1),
    ])
    .await;

    assert_run_failed_at(&run, "b");
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.last_error, "cancelled");
    assert_eq!(failure.attempts, 0);
    assert_eq!(b.calls(), 0);

    // the stage that was running completed and kept its record
    assert_eq!(run.attempts().len(), 1);
    assert!(run.attempts()[0].outcome.success);
    assert_eq!(sink.reports().await[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_action_observing_cancel_records_cancelled() {
    let a = ScriptedAction::new(vec![Step::Fail(cancelled_error)]);

    let (run, _sink) = run_stages(vec![stage("a", a.clone(), 3)]).await;

    assert_run_failed_at(&run, "a");
    assert_eq!(a.calls(), 1);
    assert_eq!(details(&run, "a"), vec![Some("cancelled".to_string())]);
    assert_eq!(run.failure.as_ref().unwrap().last_error, "cancelled");
}

#[tokio::test]
async fn test_cancel_flag_shared_with_runner() {
    let cancel = CancelFlag::new();
    let a = ScriptedAction::ok();
    let pipeline = Pipeline::new("scenario", vec![stage("a", a.clone(), 1)]).unwrap();
    let mut runner = PipelineRunner::new(AuditLog::new()).with_cancel_flag(cancel.clone());

    runner.cancel_flag().cancel();
    let run = runner.run(&pipeline).await;

    assert!(cancel.is_cancelled());
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(a.calls(), 0);
}
