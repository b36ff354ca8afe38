//! Test: Cleanup - blob deletion is best-effort and failed runs report their residue

use crate::helpers::*;
use bak2cloud::core::config::MigrationConfig;
use bak2cloud::core::Pipeline;
use bak2cloud::execution::PipelineRunner;
use bak2cloud::persistence::AuditLog;

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(dir.path(), "stages:\n  - cleanup-backup");
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let tools = FakeTools::new(
        FakeCloud {
            fail_deletes: true,
            ..Default::default()
        },
        FakeDatabase::default(),
        FakePackager::default(),
    );
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    for _ in 0..2 {
        let mut runner = PipelineRunner::new(AuditLog::new());
        let run = runner.run(&pipeline).await;
        assert_run_succeeded(&run);
        assert_eq!(run.attempts().len(), 1);
    }
    assert_eq!(tools.cloud.calls(), vec!["delete sales.bak", "delete sales.bak"]);
}

#[tokio::test]
async fn test_failed_import_lists_every_residue() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(
        dir.path(),
        r#"stages:
  - authenticate
  - upload-backup
  - await-staging
  - restore-to-staging
  - export-package
  - name: import-to-target
    max_attempts: 2
  - cleanup-backup"#,
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let tools = FakeTools::new(
        FakeCloud::default(),
        FakeDatabase::default(),
        FakePackager {
            fail_imports: true,
            ..Default::default()
        },
    );
    let pipeline = Pipeline::from_config(&config, &tools.collaborators()).unwrap();

    let mut runner = PipelineRunner::new(AuditLog::new());
    let (run, report) = runner.run_with_report(&pipeline).await;

    assert_run_failed_at(&run, "import-to-target");
    assert_eq!(
        report.failure.as_ref().unwrap().last_error,
        "Packaging failed: target is read-only"
    );
    // the backup blob was never cleaned up
    assert!(!tools.cloud.calls().contains(&"delete sales.bak".to_string()));

    let residue: Vec<(&str, &str, bool)> = report
        .cleanup
        .iter()
        .map(|n| (n.stage_name.as_str(), n.residue.as_str(), n.failed_stage))
        .collect();
    assert_eq!(
        residue,
        vec![
            ("upload-backup", "uploaded blob in the storage container", false),
            ("restore-to-staging", "restored staging database", false),
            ("export-package", "package file", false),
            ("import-to-target", "partially imported target database", true),
        ]
    );
    assert_eq!(report.summary.stage("import-to-target").unwrap().attempts, 2);
}
