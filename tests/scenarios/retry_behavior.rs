//! Test: Retry Behavior - transient failures are retried within the stage's budget

use crate::helpers::*;
use bak2cloud::core::config::MigrationConfig;
use bak2cloud::core::Pipeline;
use bak2cloud::execution::PipelineRunner;
use bak2cloud::persistence::AuditLog;
use std::sync::atomic::Ordering;

/// A succeeds; B fails twice then succeeds on its last allowed attempt; C succeeds
#[tokio::test]
async fn test_stage_recovers_on_final_attempt() {
    let b = ScriptedAction::new(vec![
        Step::Fail(transfer_error),
        Step::Fail(transfer_error),
        Step::Succeed,
    ]);

    let (run, sink) = run_stages(vec![
        stage("a", ScriptedAction::ok(), 3),
        stage("b", b.clone(), 3),
        stage("c", ScriptedAction::ok(), 3),
    ])
    .await;

    assert_run_succeeded(&run);
    assert_eq!(run.attempts().len(), 5);
    assert_eq!(sink.records().await.len(), 5);

    let numbers: Vec<u32> = run.attempts_for("b").map(|r| r.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(
        details(&run, "b"),
        vec![
            Some("Transfer failed: connection reset by peer".to_string()),
            Some("Transfer failed: connection reset by peer".to_string()),
            None,
        ]
    );
    // pre-check before attempts 2 and 3
    assert_eq!(b.prechecks(), 2);
}

#[tokio::test]
async fn test_attempts_are_sequential_in_time() {
    let b = ScriptedAction::new(vec![Step::Fail(transfer_error)]);
    let (run, _sink) = run_stages(vec![stage("a", ScriptedAction::ok(), 1), stage("b", b, 2)]).await;

    assert_run_succeeded(&run);
    for pair in run.attempts().windows(2) {
        assert!(pair[0].started_at <= pair[0].ended_at);
        assert!(pair[0].ended_at <= pair[1].started_at);
    }
}

/// A restore that fails part-way leaves a database behind; the retry drops it first
#[tokio::test]
async fn test_restore_retry_drops_partial_database() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(
        dir.path(),
        r#"stages:
  - name: restore-to-staging
    max_attempts: 2"#,
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let tools = FakeTools::new(
        FakeCloud::default(),
        FakeDatabase {
            failing_restores: 1,
            ..Default::default()
        },
        FakePackager::default(),
    );
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    let mut runner = PipelineRunner::new(AuditLog::new());
    let run = runner.run(&pipeline).await;

    assert_run_succeeded(&run);
    assert_eq!(
        details(&run, "restore-to-staging"),
        vec![
            Some("Restore failed: restore of sales.bak interrupted".to_string()),
            None,
        ]
    );
    assert_eq!(*tools.database.dropped.lock().unwrap(), vec!["sales_staging"]);
    assert_eq!(*tools.database.existing.lock().unwrap(), vec!["sales_staging"]);
    assert_eq!(tools.database.restores.load(Ordering::SeqCst), 2);
}

/// With a single allowed attempt the partial database is reported for manual cleanup
#[tokio::test]
async fn test_restore_without_retry_budget_reports_residue() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(
        dir.path(),
        r#"stages:
  - authenticate
  - name: restore-to-staging
    max_attempts: 1"#,
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let tools = FakeTools::new(
        FakeCloud::default(),
        FakeDatabase {
            failing_restores: 1,
            ..Default::default()
        },
        FakePackager::default(),
    );
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    let mut runner = PipelineRunner::new(AuditLog::new());
    let (run, report) = runner.run_with_report(&pipeline).await;

    assert_run_failed_at(&run, "restore-to-staging");
    assert_eq!(report.cleanup.len(), 1);
    assert_eq!(report.cleanup[0].stage_name, "restore-to-staging");
    assert_eq!(report.cleanup[0].residue, "partially restored staging database");
    assert!(report.cleanup[0].failed_stage);
}

/// A target database that existed before the run is never dropped or imported over
#[tokio::test]
async fn test_import_leaves_existing_target_alone() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(
        dir.path(),
        r#"stages:
  - export-package
  - name: import-to-target
    max_attempts: 3"#,
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let tools = FakeTools::new(
        FakeCloud::default(),
        FakeDatabase {
            existing: std::sync::Mutex::new(vec!["sales".to_string()]),
            ..Default::default()
        },
        FakePackager {
            fail_imports: true,
            ..Default::default()
        },
    );
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    let mut runner = PipelineRunner::new(AuditLog::new());
    let run = runner.run(&pipeline).await;

    assert_run_failed_at(&run, "import-to-target");
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.attempts, 1);
    assert!(
        failure.last_error.contains("already exists"),
        "unexpected error: {}",
        failure.last_error
    );
    assert!(tools.database.dropped.lock().unwrap().is_empty());
    assert_eq!(*tools.database.existing.lock().unwrap(), vec!["sales"]);
    assert!(tools.packager.imports.lock().unwrap().is_empty());
}
