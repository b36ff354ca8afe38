//! Pipeline domain model

use crate::adapters::{
    AwaitReachable, BlobRef, Collaborators, DeleteArtifact, DownloadArtifact, EnsureAuthenticated, ExportToArchive,
    ExternalAction, ImportToTarget, RestoreToStaging, UploadArtifact,
};
use crate::core::{
    config::{MigrationConfig, StageKey},
    error::ConfigError,
    stage::Stage,
    state::StagePlan,
};
use crate::execution::probe::ProbePolicy;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The static, ordered recipe of stages a run executes
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create a pipeline from stages in run order
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::invalid("stages", "at least one stage is required"));
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::missing("stages.name"));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
            if stage.max_attempts == 0 {
                return Err(ConfigError::invalid(
                    format!("stages.{}.max_attempts", stage.name),
                    "must be at least 1",
                ));
            }
            if stage.timeout.is_zero() {
                return Err(ConfigError::invalid(
                    format!("stages.{}.timeout_secs", stage.name),
                    "must be greater than 0",
                ));
            }
        }

        Ok(Self {
            name: name.into(),
            stages,
        })
    }

    /// Build the migration pipeline from validated configuration
    ///
    /// Credential handles are resolved here, so an unset password variable
    /// fails before any stage runs.
    pub fn from_config(config: &MigrationConfig, tools: &Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;

        let stages = config
            .stage_policies()
            .into_iter()
            .map(|policy| {
                let action = Self::action_for(policy.key, config, tools)?;
                Ok(Stage::new(policy.key.as_str(), action)
                    .with_timeout(policy.timeout)
                    .with_max_attempts(policy.max_attempts)
                    .with_backoff(policy.backoff))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::new(config.name.clone(), stages)
    }

    fn action_for(
        key: StageKey,
        config: &MigrationConfig,
        tools: &Collaborators,
    ) -> Result<Arc<dyn ExternalAction>, ConfigError> {
        let blob = |name: Option<String>, field: &str| {
            name.map(|n| BlobRef::new(&config.storage.account, &config.storage.container, n))
                .ok_or_else(|| ConfigError::missing(field))
        };

        let action: Arc<dyn ExternalAction> = match key {
            StageKey::Authenticate => Arc::new(EnsureAuthenticated::new(
                tools.session.clone(),
                &config.cloud.tenant_id,
                &config.cloud.subscription_id,
            )),
            StageKey::UploadBackup => Arc::new(UploadArtifact::new(
                tools.storage.clone(),
                &config.source.backup_file,
                blob(config.backup_blob_name(), "source.blob_name")?,
            )),
            StageKey::AwaitStaging => Arc::new(AwaitReachable::new(
                tools.database.clone(),
                &config.staging.server,
                config.staging.credentials("staging")?,
                ProbePolicy {
                    timeout: Duration::from_secs(config.probe.timeout_secs),
                    interval: Duration::from_secs(config.probe.interval_secs),
                },
            )),
            StageKey::RestoreToStaging => Arc::new(RestoreToStaging::new(
                tools.storage.clone(),
                tools.database.clone(),
                &config.staging.server,
                config.staging.credentials("staging")?,
                blob(config.backup_blob_name(), "source.blob_name")?,
                &config.staging.database,
                Duration::from_secs(u64::from(config.storage.token_expiry_hours) * 3600),
            )),
            StageKey::ExportPackage => Arc::new(ExportToArchive::new(
                tools.packager.clone(),
                &config.staging.server,
                &config.staging.database,
                config.staging.credentials("staging")?,
                config.package_file(),
            )),
            StageKey::ArchivePackage => Arc::new(UploadArtifact::new(
                tools.storage.clone(),
                config.package_file(),
                blob(config.package_blob_name(), "package.blob_name")?,
            )),
            StageKey::DownloadPackage => Arc::new(DownloadArtifact::new(
                tools.storage.clone(),
                blob(config.package_blob_name(), "package.blob_name")?,
                config.package_file(),
            )),
            StageKey::ImportToTarget => Arc::new(ImportToTarget::new(
                tools.packager.clone(),
                tools.database.clone(),
                &config.target.endpoint.server,
                &config.target.endpoint.database,
                config.target.endpoint.credentials("target")?,
                config.package_file(),
                config.target.sizing.clone(),
            )),
            StageKey::CleanupBackup => Arc::new(DeleteArtifact::new(
                tools.storage.clone(),
                blob(config.backup_blob_name(), "source.blob_name")?,
            )),
        };
        Ok(action)
    }

    /// Stages in run order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn plan(&self) -> Vec<StagePlan> {
        self.stages.iter().map(Stage::plan).collect()
    }
}
