//! Test: Success Chain - every stage runs once, in order

use crate::helpers::*;
use bak2cloud::core::config::MigrationConfig;
use bak2cloud::core::Pipeline;
use bak2cloud::execution::PipelineRunner;
use bak2cloud::persistence::{AuditLog, JsonlJournal, RunReport};

#[tokio::test]
async fn test_stages_run_once_in_order() {
    let a = ScriptedAction::ok();
    let b = ScriptedAction::ok();
    let c = ScriptedAction::ok();

    let (run, sink) = run_stages(vec![
        stage("a", a.clone(), 3),
        stage("b", b.clone(), 3),
        stage("c", c.clone(), 3),
    ])
    .await;

    assert_run_succeeded(&run);
    let order: Vec<&str> = run.attempts().iter().map(|r| r.stage_name.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(run.attempts().iter().all(|r| r.attempt_number == 1 && r.outcome.success));
    assert_eq!(
        run.attempts()[1].outcome.produced_artifact_ref.as_deref(),
        Some("b-1")
    );
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    // no retry, no pre-check
    assert_eq!(a.prechecks() + b.prechecks() + c.prechecks(), 0);

    assert_eq!(sink.records().await.len(), 3);
    let reports = sink.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].summary.total_attempts, 3);
    assert!(reports[0].cleanup.is_empty());
}

#[tokio::test]
async fn test_full_migration_against_fake_tools() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_yaml(&migration_yaml(dir.path(), "")).unwrap();
    let tools = FakeTools::default();
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    let journal = std::sync::Arc::new(JsonlJournal::new(dir.path().join("audit")));
    let mut runner = PipelineRunner::new(AuditLog::new().with_sink(journal.clone()))
        .with_workdir(dir.path().join("work"));
    let run = runner.run(&pipeline).await;

    assert_run_succeeded(&run);
    assert_eq!(run.attempts().len(), 8);
    assert_eq!(
        tools.cloud.calls(),
        vec![
            "login tenant-1",
            "upload sales.bak",
            "token bak-files rl",
            "upload sales_staging.bacpac",
            "delete sales.bak",
        ]
    );
    assert_eq!(*tools.cloud.blobs.lock().unwrap(), vec!["sales_staging.bacpac"]);
    assert_eq!(*tools.database.existing.lock().unwrap(), vec!["sales_staging"]);

    let imports = tools.packager.imports.lock().unwrap().clone();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, "sales");
    assert_eq!(imports[0].1.service_objective.as_deref(), Some("GP_Gen5_2"));

    // every attempt journalled, summary written next to it
    let entries = journal.entries().await.unwrap();
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.run_id == run.run_id));
    let summary = std::fs::read_to_string(journal.summary_path(run.run_id)).unwrap();
    let report: RunReport = serde_json::from_str(&summary).unwrap();
    assert_eq!(report.status, run.status);
    assert_eq!(report.summary.successes, 8);
}
