//! Test: Config Pipeline - building the stage list from YAML

use crate::helpers::*;
use bak2cloud::core::config::MigrationConfig;
use bak2cloud::core::{ConfigError, Pipeline};
use std::time::Duration;

#[test]
fn test_default_stage_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_yaml(&migration_yaml(dir.path(), "")).unwrap();
    let pipeline = Pipeline::from_config(&config, &FakeTools::default().collaborators()).unwrap();

    let names: Vec<&str> = pipeline.stages().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "authenticate",
            "upload-backup",
            "await-staging",
            "restore-to-staging",
            "export-package",
            "archive-package",
            "import-to-target",
            "cleanup-backup",
        ]
    );
    let kinds: Vec<&str> = pipeline.stages().iter().map(|s| s.action.kind()).collect();
    assert_eq!(kinds[1], "upload-artifact");
    assert_eq!(kinds[5], "upload-artifact");
    assert!(pipeline.stages().iter().all(|s| s.max_attempts == 3));
    assert!(pipeline.stages().iter().all(|s| s.timeout == Duration::from_secs(30)));
}

#[test]
fn test_stage_overrides_apply() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(
        dir.path(),
        r#"stages:
  - authenticate
  - name: download-package
    timeout_secs: 7200
    max_attempts: 5
  - import-to-target"#,
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let pipeline = Pipeline::from_config(&config, &FakeTools::default().collaborators()).unwrap();

    let download = pipeline.stage("download-package").unwrap();
    assert_eq!(download.timeout, Duration::from_secs(7200));
    assert_eq!(download.max_attempts, 5);
    assert_eq!(download.action.kind(), "download-artifact");
    assert_eq!(pipeline.stage("authenticate").unwrap().max_attempts, 3);
}

#[test]
fn test_duplicate_stage_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(dir.path(), "stages:\n  - authenticate\n  - authenticate");
    let err = MigrationConfig::from_yaml(&yaml).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateStage(ref name) if name == "authenticate"));
}

#[test]
fn test_unset_password_variable_fails_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = migration_yaml(dir.path(), "").replace(
        "  password: \"hunter2\"\n  database: \"sales\"",
        "  password_env: \"BAK2CLOUD_TEST_UNSET_TARGET_PASSWORD\"\n  database: \"sales\"",
    );
    let config = MigrationConfig::from_yaml(&yaml).unwrap();

    let err = Pipeline::from_config(&config, &FakeTools::default().collaborators()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "target.password_env"));
}

#[test]
fn test_plan_describes_each_stage() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_yaml(&migration_yaml(dir.path(), "stages:\n  - restore-to-staging")).unwrap();
    let pipeline = Pipeline::from_config(&config, &FakeTools::default().collaborators()).unwrap();

    let plan = pipeline.plan();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].action, "restore-to-staging");
    assert_eq!(plan[0].residue, "partially restored staging database");
    assert_eq!(plan[0].leftover, "restored staging database");
    assert_eq!(plan[0].timeout_secs, 30);
}
