//! Cloud CLI (`az`) backed session and storage

use crate::adapters::{process::ToolCommand, AccessToken, BlobRef, CloudSession, CloudStorage, Session};
use crate::core::{config::Secret, error::ActionError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Client for the `az` command-line tool
#[derive(Debug, Clone)]
pub struct AzCli {
    program: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountShow {
    id: String,
    tenant_id: String,
    #[serde(default)]
    user: Option<AccountUser>,
}

#[derive(Debug, Deserialize)]
struct AccountUser {
    name: String,
}

impl AzCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program)
    }

    fn blob_args(&self, blob: &BlobRef) -> Vec<String> {
        vec![
            "--account-name".to_string(),
            blob.account.clone(),
            "--container-name".to_string(),
            blob.container.clone(),
            "--name".to_string(),
            blob.name.clone(),
            "--auth-mode".to_string(),
            "login".to_string(),
            "--only-show-errors".to_string(),
        ]
    }

    pub fn upload_command(&self, local_path: &Path, blob: &BlobRef) -> ToolCommand {
        self.command()
            .args(["storage", "blob", "upload"])
            .args(self.blob_args(blob))
            .arg("--file")
            .arg(local_path.to_string_lossy())
            .args(["--overwrite", "true"])
    }

    pub fn download_command(&self, blob: &BlobRef, local_path: &Path) -> ToolCommand {
        self.command()
            .args(["storage", "blob", "download"])
            .args(self.blob_args(blob))
            .arg("--file")
            .arg(local_path.to_string_lossy())
            .args(["--overwrite", "true"])
    }

    pub fn delete_command(&self, blob: &BlobRef) -> ToolCommand {
        self.command()
            .args(["storage", "blob", "delete"])
            .args(self.blob_args(blob))
    }

    pub fn token_command(
        &self,
        account: &str,
        container: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> ToolCommand {
        self.command()
            .args(["storage", "container", "generate-sas"])
            .args(["--account-name", account, "--name", container, "--permissions", permissions])
            .arg("--expiry")
            .arg(expiry.to_rfc3339_opts(SecondsFormat::Secs, true))
            .args(["--auth-mode", "login", "--as-user", "--https-only", "--output", "tsv"])
    }

    async fn account_show(&self) -> Result<AccountShow, ActionError> {
        let stdout = self
            .command()
            .args(["account", "show", "--output", "json"])
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Auth))?;
        serde_json::from_str(&stdout)
            .map_err(|e| ActionError::Auth(format!("Unexpected `az account show` output: {}", e)))
    }
}

#[async_trait]
impl CloudSession for AzCli {
    async fn ensure_authenticated(&self, tenant: &str, subscription: &str) -> Result<Session, ActionError> {
        let logged_in = match self.account_show().await {
            Ok(account) => account.tenant_id.eq_ignore_ascii_case(tenant),
            Err(e) => {
                debug!("No usable az session: {}", e);
                false
            }
        };

        if !logged_in {
            info!("Logging in to tenant {}", tenant);
            self.command()
                .args(["login", "--tenant", tenant, "--output", "none"])
                .run()
                .await
                .map_err(|e| e.into_action_error(ActionError::Auth))?;
        }

        self.command()
            .args(["account", "set", "--subscription", subscription])
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Auth))?;

        let account = self.account_show().await?;
        if !account.id.eq_ignore_ascii_case(subscription) {
            return Err(ActionError::Auth(format!(
                "Active subscription is {} after selecting {}",
                account.id, subscription
            )));
        }

        Ok(Session {
            tenant_id: account.tenant_id,
            subscription_id: account.id,
            account: account.user.map(|u| u.name).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CloudStorage for AzCli {
    async fn generate_access_token(
        &self,
        account: &str,
        container: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<AccessToken, ActionError> {
        let stdout = self
            .token_command(account, container, permissions, expiry)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Transfer))?;

        let token = stdout.trim().trim_matches('"').to_string();
        if token.is_empty() {
            return Err(ActionError::Transfer("az returned an empty access token".to_string()));
        }

        Ok(AccessToken {
            token: Secret::new(token),
            expires_at: expiry,
        })
    }

    async fn upload(&self, local_path: &Path, blob: &BlobRef) -> Result<(), ActionError> {
        self.upload_command(local_path, blob)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Transfer))?;
        Ok(())
    }

    async fn download(&self, blob: &BlobRef, local_path: &Path) -> Result<(), ActionError> {
        self.download_command(blob, local_path)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Transfer))?;
        Ok(())
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), ActionError> {
        self.delete_command(blob)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Transfer))?;
        Ok(())
    }
}
