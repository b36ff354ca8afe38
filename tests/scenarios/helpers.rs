//! Test utilities: scripted actions, fake tools and misbehaving audit sinks

use async_trait::async_trait;
use bak2cloud::adapters::{
    AccessToken, ActionContract, BlobRef, CloudSession, CloudStorage, Collaborators, ExternalAction, RemoteDatabase,
    SchemaPackager, Session, SignedUrl,
};
use bak2cloud::core::config::{Credentials, Secret, SizingOptions};
use bak2cloud::core::{ActionContext, ActionError, AttemptRecord, AuditError, Pipeline, PipelineRun, RunStatus, Stage};
use bak2cloud::execution::PipelineRunner;
use bak2cloud::persistence::{AuditLog, AuditMirror, AuditSink, InMemoryAuditSink, RunReport};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// What a scripted action does on one call
pub enum Step {
    Succeed,
    Fail(fn() -> ActionError),
    /// Sleep, then succeed
    Hang(Duration),
    /// Raise the run's cancel flag, then succeed
    CancelRun,
}

/// Action that plays back a script, one step per call; succeeds once the script runs out
pub struct ScriptedAction {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    prechecks: AtomicU32,
}

impl ScriptedAction {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            prechecks: AtomicU32::new(0),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn failing(error: fn() -> ActionError) -> Arc<Self> {
        Self::new((0..100).map(|_| Step::Fail(error)).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prechecks(&self) -> u32 {
        self.prechecks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalAction for ScriptedAction {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn contract(&self) -> ActionContract {
        ActionContract {
            idempotent: false,
            retry_precheck: Some("count the pre-check"),
            leftover: "scripted leftover",
            residue: "scripted residue",
        }
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Option<String>, ActionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None | Some(Step::Succeed) => Ok(Some(format!("{}-{}", ctx.stage_name, n))),
            Some(Step::Fail(error)) => Err(error()),
            Some(Step::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Some(Step::CancelRun) => {
                ctx.cancel.cancel();
                Ok(None)
            }
        }
    }

    async fn prepare_retry(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        self.prechecks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn transfer_error() -> ActionError {
    ActionError::Transfer("connection reset by peer".to_string())
}

pub fn auth_error() -> ActionError {
    ActionError::Auth("token expired".to_string())
}

pub fn cancelled_error() -> ActionError {
    ActionError::Cancelled
}

/// A stage with a short timeout and no backoff
pub fn stage(name: &str, action: Arc<ScriptedAction>, max_attempts: u32) -> Stage {
    Stage::new(name, action)
        .with_timeout(Duration::from_secs(5))
        .with_max_attempts(max_attempts)
}

/// Run `stages` with an in-memory audit sink
pub async fn run_stages(stages: Vec<Stage>) -> (PipelineRun, Arc<InMemoryAuditSink>) {
    let sink = Arc::new(InMemoryAuditSink::new());
    let audit = AuditLog::new().with_sink(sink.clone());
    let run = run_with_audit(stages, audit).await;
    (run, sink)
}

pub async fn run_with_audit(stages: Vec<Stage>, audit: AuditLog) -> PipelineRun {
    let pipeline = Pipeline::new("scenario", stages).unwrap();
    let mut runner = PipelineRunner::new(audit);
    runner.run(&pipeline).await
}

pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_eq!(
        run.status,
        RunStatus::Succeeded,
        "Expected success, got failure: {:?}",
        run.failure
    );
    assert!(run.failure.is_none());
}

pub fn assert_run_failed_at(run: &PipelineRun, stage_name: &str) {
    assert_eq!(run.status, RunStatus::Failed);
    let failure = run.failure.as_ref().expect("failed run carries a failure");
    assert_eq!(failure.stage_name, stage_name);
}

pub fn details(run: &PipelineRun, stage_name: &str) -> Vec<Option<String>> {
    run.attempts_for(stage_name)
        .map(|r| r.outcome.error_detail.clone())
        .collect()
}

/// Sink that accepts `ok_appends` records, then fails every write
pub struct FailingSink {
    ok_appends: u32,
    appends: AtomicU32,
}

impl FailingSink {
    pub fn after(ok_appends: u32) -> Arc<Self> {
        Arc::new(Self {
            ok_appends,
            appends: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl AuditSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn append(&self, _run_id: Uuid, _record: &AttemptRecord) -> Result<(), AuditError> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst);
        if n >= self.ok_appends {
            return Err(AuditError::Store("disk full".to_string()));
        }
        Ok(())
    }

    async fn finish_run(&self, _report: &RunReport) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Mirror whose uploads always fail
#[derive(Default)]
pub struct FailingMirror {
    pub attempts: AtomicU32,
}

#[async_trait]
impl AuditMirror for FailingMirror {
    async fn publish(&self, _report: &RunReport) -> Result<(), AuditError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AuditError::Store("container not found".to_string()))
    }
}

/// Cloud session and blob storage that keep blobs in memory
#[derive(Default)]
pub struct FakeCloud {
    pub blobs: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_deletes: bool,
}

impl FakeCloud {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CloudSession for FakeCloud {
    async fn ensure_authenticated(&self, tenant: &str, subscription: &str) -> Result<Session, ActionError> {
        self.log(format!("login {}", tenant));
        Ok(Session {
            tenant_id: tenant.to_string(),
            subscription_id: subscription.to_string(),
            account: "migrator@example.com".to_string(),
        })
    }
}

#[async_trait]
impl CloudStorage for FakeCloud {
    async fn generate_access_token(
        &self,
        _account: &str,
        container: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<AccessToken, ActionError> {
        self.log(format!("token {} {}", container, permissions));
        Ok(AccessToken {
            token: Secret::new("sv=2024&sig=abc"),
            expires_at: expiry,
        })
    }

    async fn upload(&self, local_path: &Path, blob: &BlobRef) -> Result<(), ActionError> {
        assert!(local_path.is_file(), "uploading a missing file");
        self.log(format!("upload {}", blob.name));
        self.blobs.lock().unwrap().push(blob.name.clone());
        Ok(())
    }

    async fn download(&self, blob: &BlobRef, local_path: &Path) -> Result<(), ActionError> {
        self.log(format!("download {}", blob.name));
        std::fs::write(local_path, b"package").map_err(|e| ActionError::Transfer(e.to_string()))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), ActionError> {
        self.log(format!("delete {}", blob.name));
        if self.fail_deletes {
            return Err(ActionError::Transfer("blob not found".to_string()));
        }
        self.blobs.lock().unwrap().retain(|b| b != &blob.name);
        Ok(())
    }
}

/// Database server that can fail the first restores part-way through
#[derive(Default)]
pub struct FakeDatabase {
    pub existing: Mutex<Vec<String>>,
    pub dropped: Mutex<Vec<String>>,
    pub restores: AtomicU32,
    pub failing_restores: u32,
}

#[async_trait]
impl RemoteDatabase for FakeDatabase {
    async fn probe_reachable(&self, _server: &str, _credentials: &Credentials, _deadline: Duration) -> bool {
        true
    }

    async fn restore_from_url(
        &self,
        _server: &str,
        _credentials: &Credentials,
        target_db: &str,
        source: &SignedUrl,
    ) -> Result<(), ActionError> {
        let n = self.restores.fetch_add(1, Ordering::SeqCst);
        let mut existing = self.existing.lock().unwrap();
        if existing.iter().any(|d| d == target_db) {
            return Err(ActionError::Restore(format!("database {} already exists", target_db)));
        }
        existing.push(target_db.to_string());
        if n < self.failing_restores {
            return Err(ActionError::Restore(format!("restore of {} interrupted", source.blob.name)));
        }
        Ok(())
    }

    async fn database_exists(&self, _server: &str, _credentials: &Credentials, db: &str) -> Result<bool, ActionError> {
        Ok(self.existing.lock().unwrap().iter().any(|d| d == db))
    }

    async fn drop_database(&self, _server: &str, _credentials: &Credentials, db: &str) -> Result<(), ActionError> {
        self.existing.lock().unwrap().retain(|d| d != db);
        self.dropped.lock().unwrap().push(db.to_string());
        Ok(())
    }
}

/// Packager that writes a small package file on export
#[derive(Default)]
pub struct FakePackager {
    pub imports: Mutex<Vec<(String, SizingOptions)>>,
    pub fail_imports: bool,
}

#[async_trait]
impl SchemaPackager for FakePackager {
    async fn export(
        &self,
        _server: &str,
        db: &str,
        _credentials: &Credentials,
        output_file: &Path,
    ) -> Result<(), ActionError> {
        std::fs::write(output_file, format!("package of {}", db)).map_err(|e| ActionError::Packaging(e.to_string()))
    }

    async fn import(
        &self,
        _server: &str,
        db: &str,
        _credentials: &Credentials,
        input_file: &Path,
        sizing: &SizingOptions,
    ) -> Result<(), ActionError> {
        assert!(input_file.is_file(), "importing a missing package");
        if self.fail_imports {
            return Err(ActionError::Packaging("target is read-only".to_string()));
        }
        self.imports.lock().unwrap().push((db.to_string(), sizing.clone()));
        Ok(())
    }
}

pub struct FakeTools {
    pub cloud: Arc<FakeCloud>,
    pub database: Arc<FakeDatabase>,
    pub packager: Arc<FakePackager>,
}

impl FakeTools {
    pub fn new(cloud: FakeCloud, database: FakeDatabase, packager: FakePackager) -> Self {
        Self {
            cloud: Arc::new(cloud),
            database: Arc::new(database),
            packager: Arc::new(packager),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            session: self.cloud.clone(),
            storage: self.cloud.clone(),
            database: self.database.clone(),
            packager: self.packager.clone(),
        }
    }
}

impl Default for FakeTools {
    fn default() -> Self {
        Self::new(FakeCloud::default(), FakeDatabase::default(), FakePackager::default())
    }
}

/// Migration configuration rooted in `dir`, with the backup file created there
pub fn migration_yaml(dir: &Path, stages: &str) -> String {
    let backup = dir.join("sales.bak");
    std::fs::write(&backup, b"backup").unwrap();
    format!(
        r#"
name: "sales-migration"
cloud:
  tenant_id: "tenant-1"
  subscription_id: "sub-1"
storage:
  account: "salesbackups"
  container: "bak-files"
source:
  backup_file: "{backup}"
staging:
  server: "mi-staging.database.windows.net"
  admin_user: "sqladmin"
  password: "hunter2"
  database: "sales_staging"
target:
  server: "sales.database.windows.net"
  admin_user: "sqladmin"
  password: "hunter2"
  database: "sales"
  sizing:
    edition: "GeneralPurpose"
    service_objective: "GP_Gen5_2"
workdir: "{workdir}"
probe:
  timeout_secs: 5
  interval_secs: 1
retry:
  max_attempts: 3
  timeout_secs: 30
  backoff_secs: 0
{stages}
"#,
        backup = backup.display(),
        workdir = dir.join("work").display(),
        stages = stages,
    )
}
