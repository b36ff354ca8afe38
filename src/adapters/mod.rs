//! External collaborators and the actions that wrap them
//!
//! Every stage of a migration is a call out to an external tool. The
//! collaborator traits describe those tools; the `ExternalAction` trait is
//! what the stage executor invokes.

pub mod actions;
pub mod az;
pub mod process;
pub mod sqlcmd;
pub mod sqlpackage;

use crate::core::{
    config::{Credentials, Secret, SizingOptions, ToolsConfig},
    context::ActionContext,
    error::ActionError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use actions::*;
pub use az::AzCli;
pub use sqlcmd::SqlCmd;
pub use sqlpackage::SqlPackage;

/// An authenticated cloud CLI session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub tenant_id: String,
    pub subscription_id: String,
    pub account: String,
}

/// A limited-lifetime access token for a storage container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: Secret,
    pub expires_at: DateTime<Utc>,
}

/// Location of a blob in cloud storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub account: String,
    pub container: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(account: impl Into<String>, container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn container_url(&self) -> String {
        format!("https://{}.blob.core.windows.net/{}", self.account, self.container)
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.container_url(), self.name)
    }
}

/// A blob URL together with the token granting read access to it
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub blob: BlobRef,
    pub token: AccessToken,
}

#[async_trait]
pub trait CloudSession: Send + Sync {
    async fn ensure_authenticated(&self, tenant: &str, subscription: &str) -> Result<Session, ActionError>;
}

#[async_trait]
pub trait CloudStorage: Send + Sync {
    async fn generate_access_token(
        &self,
        account: &str,
        container: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<AccessToken, ActionError>;

    async fn upload(&self, local_path: &Path, blob: &BlobRef) -> Result<(), ActionError>;

    async fn download(&self, blob: &BlobRef, local_path: &Path) -> Result<(), ActionError>;

    async fn delete(&self, blob: &BlobRef) -> Result<(), ActionError>;
}

#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// One connection try, bounded by `deadline`
    async fn probe_reachable(&self, server: &str, credentials: &Credentials, deadline: Duration) -> bool;

    async fn restore_from_url(
        &self,
        server: &str,
        credentials: &Credentials,
        target_db: &str,
        source: &SignedUrl,
    ) -> Result<(), ActionError>;

    async fn database_exists(&self, server: &str, credentials: &Credentials, db: &str) -> Result<bool, ActionError>;

    async fn drop_database(&self, server: &str, credentials: &Credentials, db: &str) -> Result<(), ActionError>;
}

#[async_trait]
pub trait SchemaPackager: Send + Sync {
    async fn export(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        output_file: &Path,
    ) -> Result<(), ActionError>;

    async fn import(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        input_file: &Path,
        sizing: &SizingOptions,
    ) -> Result<(), ActionError>;
}

/// Retry semantics an action commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionContract {
    /// Safe to re-invoke without checking remote state first
    pub idempotent: bool,
    /// What `prepare_retry` does before a second or later attempt
    pub retry_precheck: Option<&'static str>,
    /// What a completed attempt leaves behind for cleanup
    pub leftover: &'static str,
    /// Partial state a failed attempt may leave behind
    pub residue: &'static str,
}

/// One external operation a stage performs
#[async_trait]
pub trait ExternalAction: Send + Sync {
    /// Short action name, e.g. `restore-to-staging`
    fn kind(&self) -> &'static str;

    fn contract(&self) -> ActionContract;

    /// Run the operation once. Returns a reference to the artifact produced, if any.
    async fn execute(&self, ctx: &ActionContext) -> Result<Option<String>, ActionError>;

    /// Clear partial state left by a previous attempt. Called before every attempt after the first.
    async fn prepare_retry(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// The set of tools a pipeline is built against
#[derive(Clone)]
pub struct Collaborators {
    pub session: Arc<dyn CloudSession>,
    pub storage: Arc<dyn CloudStorage>,
    pub database: Arc<dyn RemoteDatabase>,
    pub packager: Arc<dyn SchemaPackager>,
}

impl Collaborators {
    /// Collaborators backed by the command-line tools on this machine
    pub fn from_tools(tools: &ToolsConfig) -> Self {
        let az = Arc::new(AzCli::new(tools.az.clone()));
        Self {
            session: az.clone(),
            storage: az,
            database: Arc::new(SqlCmd::new(tools.sqlcmd.clone())),
            packager: Arc::new(SqlPackage::new(tools.sqlpackage.clone())),
        }
    }
}
