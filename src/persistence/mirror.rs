//! Remote copy of run reports in the storage container

use crate::adapters::{BlobRef, CloudStorage};
use crate::core::error::AuditError;
use crate::persistence::{AuditMirror, RunReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Uploads `<prefix><run_id>.summary.json` next to the migrated artifacts
pub struct BlobMirror {
    storage: Arc<dyn CloudStorage>,
    account: String,
    container: String,
    prefix: String,
    staging_dir: PathBuf,
}

impl BlobMirror {
    pub fn new(
        storage: Arc<dyn CloudStorage>,
        account: impl Into<String>,
        container: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            account: account.into(),
            container: container.into(),
            prefix: prefix.into(),
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Directory the report is written to before upload
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn blob_for(&self, report: &RunReport) -> BlobRef {
        BlobRef::new(
            &self.account,
            &self.container,
            format!("{}{}.summary.json", self.prefix, report.run_id),
        )
    }
}

/// Remove the local copy of a published report. Never fails the publish.
async fn discard_staged(local: &Path) {
    match tokio::fs::remove_file(local).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Staged report {} already gone", local.display());
        }
        Err(e) => warn!("Could not remove staged report {}: {}", local.display(), e),
    }
}

#[async_trait::async_trait]
impl AuditMirror for BlobMirror {
    async fn publish(&self, report: &RunReport) -> Result<(), AuditError> {
        let local = self
            .staging_dir
            .join(format!("bak2cloud-{}.summary.json", report.run_id));
        tokio::fs::write(&local, serde_json::to_vec_pretty(report)?).await?;

        let blob = self.blob_for(report);
        let uploaded = self.storage.upload(&local, &blob).await;
        discard_staged(&local).await;

        uploaded.map_err(|e| AuditError::Store(e.to_string()))?;
        info!("Mirrored run report to {}", blob.url());
        Ok(())
    }
}
