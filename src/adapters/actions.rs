//! The concrete operations a migration stage can perform

use crate::adapters::{
    ActionContract, BlobRef, CloudSession, CloudStorage, ExternalAction, RemoteDatabase, SchemaPackager, SignedUrl,
};
use crate::core::{
    config::{Credentials, SizingOptions},
    context::ActionContext,
    error::ActionError,
};
use crate::execution::probe::{wait_until_reachable, ProbePolicy};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read + list, the minimum a URL restore needs
const RESTORE_TOKEN_PERMISSIONS: &str = "rl";

async fn remove_partial_file(path: &Path) -> Result<(), ActionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Removed partial file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ActionError::Configuration(format!(
            "Cannot remove partial file {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), ActionError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ActionError::Configuration(format!("Cannot create directory {}: {}", parent.display(), e))
        }),
        None => Ok(()),
    }
}

async fn drop_if_exists(
    database: &dyn RemoteDatabase,
    server: &str,
    credentials: &Credentials,
    db: &str,
) -> Result<(), ActionError> {
    if database.database_exists(server, credentials, db).await? {
        warn!("Database {} on {} left by a previous attempt, dropping it", db, server);
        database.drop_database(server, credentials, db).await?;
    }
    Ok(())
}

/// Tracks, per run, that a database was absent before the action first created it.
///
/// Only a database this run created may be dropped before a retry. A database
/// that existed before the first attempt is never touched.
#[derive(Default)]
struct CreatedDatabase {
    verified_absent_for: Mutex<Option<Uuid>>,
}

impl CreatedDatabase {
    async fn ensure_absent(
        &self,
        ctx: &ActionContext,
        database: &dyn RemoteDatabase,
        server: &str,
        credentials: &Credentials,
        db: &str,
    ) -> Result<(), ActionError> {
        let mut verified = self.verified_absent_for.lock().await;
        if *verified == Some(ctx.run_id) {
            return Ok(());
        }
        if database.database_exists(server, credentials, db).await? {
            return Err(ActionError::Configuration(format!(
                "Database {} already exists on {}",
                db, server
            )));
        }
        *verified = Some(ctx.run_id);
        Ok(())
    }

    async fn drop_partial(
        &self,
        ctx: &ActionContext,
        database: &dyn RemoteDatabase,
        server: &str,
        credentials: &Credentials,
        db: &str,
    ) -> Result<(), ActionError> {
        if *self.verified_absent_for.lock().await != Some(ctx.run_id) {
            debug!("Database {} on {} was not created by this run, leaving it", db, server);
            return Ok(());
        }
        drop_if_exists(database, server, credentials, db).await
    }
}

/// Make sure the cloud CLI is logged into the expected tenant and subscription
pub struct EnsureAuthenticated {
    session: Arc<dyn CloudSession>,
    tenant_id: String,
    subscription_id: String,
}

impl EnsureAuthenticated {
    pub fn new(session: Arc<dyn CloudSession>, tenant_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            session,
            tenant_id: tenant_id.into(),
            subscription_id: subscription_id.into(),
        }
    }
}

#[async_trait]
impl ExternalAction for EnsureAuthenticated {
    fn kind(&self) -> &'static str {
        "ensure-authenticated"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: true,
            retry_precheck: None,
            leftover: "none",
            residue: "none",
        }
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        let session = self
            .session
            .ensure_authenticated(&self.tenant_id, &self.subscription_id)
            .await?;
        info!(
            "Authenticated as {} in subscription {}",
            if session.account.is_empty() { "<unknown>" } else { session.account.as_str() },
            session.subscription_id
        );
        Ok(Some(session.subscription_id))
    }
}

/// Put a local file into blob storage, overwriting any existing blob
pub struct UploadArtifact {
    storage: Arc<dyn CloudStorage>,
    local_path: PathBuf,
    blob: BlobRef,
}

impl UploadArtifact {
    pub fn new(storage: Arc<dyn CloudStorage>, local_path: impl Into<PathBuf>, blob: BlobRef) -> Self {
        Self {
            storage,
            local_path: local_path.into(),
            blob,
        }
    }
}

#[async_trait]
impl ExternalAction for UploadArtifact {
    fn kind(&self) -> &'static str {
        "upload-artifact"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: true,
            retry_precheck: None,
            leftover: "uploaded blob in the storage container",
            residue: "partial blob in the storage container",
        }
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        if !self.local_path.is_file() {
            return Err(ActionError::Configuration(format!(
                "Local file {} does not exist",
                self.local_path.display()
            )));
        }
        info!("Uploading {} to {}", self.local_path.display(), self.blob.url());
        self.storage.upload(&self.local_path, &self.blob).await?;
        Ok(Some(self.blob.url()))
    }
}

/// Fetch a blob to a local file
pub struct DownloadArtifact {
    storage: Arc<dyn CloudStorage>,
    blob: BlobRef,
    local_path: PathBuf,
}

impl DownloadArtifact {
    pub fn new(storage: Arc<dyn CloudStorage>, blob: BlobRef, local_path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            blob,
            local_path: local_path.into(),
        }
    }
}

#[async_trait]
impl ExternalAction for DownloadArtifact {
    fn kind(&self) -> &'static str {
        "download-artifact"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: false,
            retry_precheck: Some("remove partial local file"),
            leftover: "downloaded local file",
            residue: "partial local file",
        }
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        ensure_parent_dir(&self.local_path).await?;
        info!("Downloading {} to {}", self.blob.url(), self.local_path.display());
        self.storage.download(&self.blob, &self.local_path).await?;
        Ok(Some(self.local_path.display().to_string()))
    }

    async fn prepare_retry(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        remove_partial_file(&self.local_path).await
    }
}

/// Remove a blob. Failures are logged and do not fail the stage.
pub struct DeleteArtifact {
    storage: Arc<dyn CloudStorage>,
    blob: BlobRef,
}

impl DeleteArtifact {
    pub fn new(storage: Arc<dyn CloudStorage>, blob: BlobRef) -> Self {
        Self { storage, blob }
    }
}

#[async_trait]
impl ExternalAction for DeleteArtifact {
    fn kind(&self) -> &'static str {
        "delete-artifact"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: true,
            retry_precheck: None,
            leftover: "none",
            residue: "blob may remain in the storage container",
        }
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        match self.storage.delete(&self.blob).await {
            Ok(()) => info!("Deleted {}", self.blob.url()),
            Err(e) => warn!("Could not delete {}, leaving it in place: {}", self.blob.url(), e),
        }
        Ok(None)
    }
}

/// Wait for a server to accept connections
pub struct AwaitReachable {
    database: Arc<dyn RemoteDatabase>,
    server: String,
    credentials: Credentials,
    policy: ProbePolicy,
}

impl AwaitReachable {
    pub fn new(
        database: Arc<dyn RemoteDatabase>,
        server: impl Into<String>,
        credentials: Credentials,
        policy: ProbePolicy,
    ) -> Self {
        Self {
            database,
            server: server.into(),
            credentials,
            policy,
        }
    }
}

#[async_trait]
impl ExternalAction for AwaitReachable {
    fn kind(&self) -> &'static str {
        "await-reachable"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: true,
            retry_precheck: None,
            leftover: "none",
            residue: "none",
        }
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        wait_until_reachable(
            self.database.as_ref(),
            &self.server,
            &self.credentials,
            self.policy,
            &ctx.cancel,
        )
        .await?;
        Ok(None)
    }
}

/// Restore an uploaded backup onto the staging server
pub struct RestoreToStaging {
    storage: Arc<dyn CloudStorage>,
    database: Arc<dyn RemoteDatabase>,
    server: String,
    credentials: Credentials,
    backup: BlobRef,
    target_db: String,
    token_ttl: Duration,
    created: CreatedDatabase,
}

impl RestoreToStaging {
    pub fn new(
        storage: Arc<dyn CloudStorage>,
        database: Arc<dyn RemoteDatabase>,
        server: impl Into<String>,
        credentials: Credentials,
        backup: BlobRef,
        target_db: impl Into<String>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            database,
            server: server.into(),
            credentials,
            backup,
            target_db: target_db.into(),
            token_ttl,
            created: CreatedDatabase::default(),
        }
    }
}

#[async_trait]
impl ExternalAction for RestoreToStaging {
    fn kind(&self) -> &'static str {
        "restore-to-staging"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: false,
            retry_precheck: Some("drop the staging database if present"),
            leftover: "restored staging database",
            residue: "partially restored staging database",
        }
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| ActionError::Configuration(format!("Invalid token lifetime: {}", e)))?;
        self.created
            .ensure_absent(ctx, self.database.as_ref(), &self.server, &self.credentials, &self.target_db)
            .await?;
        let token = self
            .storage
            .generate_access_token(
                &self.backup.account,
                &self.backup.container,
                RESTORE_TOKEN_PERMISSIONS,
                Utc::now() + ttl,
            )
            .await?;

        info!("Restoring {} into {} on {}", self.backup.url(), self.target_db, self.server);
        let source = SignedUrl {
            blob: self.backup.clone(),
            token,
        };
        self.database
            .restore_from_url(&self.server, &self.credentials, &self.target_db, &source)
            .await?;
        Ok(Some(format!("{}/{}", self.server, self.target_db)))
    }

    async fn prepare_retry(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.created
            .drop_partial(ctx, self.database.as_ref(), &self.server, &self.credentials, &self.target_db)
            .await
    }
}

/// Export a database into a local package file
pub struct ExportToArchive {
    packager: Arc<dyn SchemaPackager>,
    server: String,
    db: String,
    credentials: Credentials,
    output_file: PathBuf,
}

impl ExportToArchive {
    pub fn new(
        packager: Arc<dyn SchemaPackager>,
        server: impl Into<String>,
        db: impl Into<String>,
        credentials: Credentials,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            packager,
            server: server.into(),
            db: db.into(),
            credentials,
            output_file: output_file.into(),
        }
    }
}

#[async_trait]
impl ExternalAction for ExportToArchive {
    fn kind(&self) -> &'static str {
        "export-to-archive"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: false,
            retry_precheck: Some("remove partial package file"),
            leftover: "package file",
            residue: "partial package file",
        }
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        ensure_parent_dir(&self.output_file).await?;
        info!("Exporting {} from {} to {}", self.db, self.server, self.output_file.display());
        self.packager
            .export(&self.server, &self.db, &self.credentials, &self.output_file)
            .await?;
        Ok(Some(self.output_file.display().to_string()))
    }

    async fn prepare_retry(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        remove_partial_file(&self.output_file).await
    }
}

/// Import a package file into the target database
pub struct ImportToTarget {
    packager: Arc<dyn SchemaPackager>,
    database: Arc<dyn RemoteDatabase>,
    server: String,
    db: String,
    credentials: Credentials,
    input_file: PathBuf,
    sizing: SizingOptions,
    created: CreatedDatabase,
}

impl ImportToTarget {
    pub fn new(
        packager: Arc<dyn SchemaPackager>,
        database: Arc<dyn RemoteDatabase>,
        server: impl Into<String>,
        db: impl Into<String>,
        credentials: Credentials,
        input_file: impl Into<PathBuf>,
        sizing: SizingOptions,
    ) -> Self {
        Self {
            packager,
            database,
            server: server.into(),
            db: db.into(),
            credentials,
            input_file: input_file.into(),
            sizing,
            created: CreatedDatabase::default(),
        }
    }
}

#[async_trait]
impl ExternalAction for ImportToTarget {
    fn kind(&self) -> &'static str {
        "import-to-target"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: false,
            retry_precheck: Some("drop the target database if present"),
            leftover: "imported target database",
            residue: "partially imported target database",
        }
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        if !self.input_file.is_file() {
            return Err(ActionError::Configuration(format!(
                "Package {} does not exist",
                self.input_file.display()
            )));
        }
        self.created
            .ensure_absent(ctx, self.database.as_ref(), &self.server, &self.credentials, &self.db)
            .await?;
        info!("Importing {} into {} on {}", self.input_file.display(), self.db, self.server);
        self.packager
            .import(&self.server, &self.db, &self.credentials, &self.input_file, &self.sizing)
            .await?;
        Ok(Some(format!("{}/{}", self.server, self.db)))
    }

    async fn prepare_retry(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.created
            .drop_partial(ctx, self.database.as_ref(), &self.server, &self.credentials, &self.db)
            .await
    }
}
