//! SQL command-line client (`sqlcmd`) backed remote database

use crate::adapters::{process::ToolCommand, RemoteDatabase, SignedUrl};
use crate::core::{config::Credentials, error::ActionError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// How often a restoring database is checked for completion
const RESTORE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Client for the `sqlcmd` command-line tool
///
/// The password is passed through `SQLCMDPASSWORD`, never on the command line.
#[derive(Debug, Clone)]
pub struct SqlCmd {
    program: String,
}

/// Quote a SQL Server identifier: `name` -> `[name]`
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a SQL Server unicode string literal: `it's` -> `N'it''s'`
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

impl SqlCmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn query_command(
        &self,
        server: &str,
        credentials: &Credentials,
        login_timeout_secs: u64,
        query: &str,
    ) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(["-S", server, "-U", credentials.user.as_str(), "-d", "master"])
            .args(["-b", "-h", "-1", "-W"])
            .arg("-l")
            .arg(login_timeout_secs.to_string())
            .arg("-Q")
            .arg(query)
            .secret_env("SQLCMDPASSWORD", credentials.password.clone())
    }

    async fn query(&self, server: &str, credentials: &Credentials, query: &str) -> Result<String, ActionError> {
        self.query_command(server, credentials, 30, query)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Restore))
    }

    fn restore_statements(target_db: &str, source: &SignedUrl) -> String {
        let container_url = source.blob.container_url();
        format!(
            "IF EXISTS (SELECT 1 FROM sys.credentials WHERE name = {url}) DROP CREDENTIAL {ident}; \
             CREATE CREDENTIAL {ident} WITH IDENTITY = 'SHARED ACCESS SIGNATURE', SECRET = {secret}; \
             RESTORE DATABASE {db} FROM URL = {blob};",
            url = quote_literal(&container_url),
            ident = quote_ident(&container_url),
            secret = format!("'{}'", source.token.token.expose().replace('\'', "''")),
            db = quote_ident(target_db),
            blob = quote_literal(&source.blob.url()),
        )
    }

    async fn database_state(&self, server: &str, credentials: &Credentials, db: &str) -> Result<Option<String>, ActionError> {
        let stdout = self
            .query(
                server,
                credentials,
                &format!(
                    "SET NOCOUNT ON; SELECT state_desc FROM sys.databases WHERE name = {};",
                    quote_literal(db)
                ),
            )
            .await?;
        Ok(first_line(&stdout).map(str::to_string))
    }
}

fn first_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|l| !l.is_empty())
}

/// `Ok(true)` once the restored database is online, `Ok(false)` while it is still restoring.
fn restore_finished(target_db: &str, state: Option<&str>) -> Result<bool, ActionError> {
    match state {
        Some("ONLINE") => Ok(true),
        Some("RESTORING") | Some("RECOVERING") => Ok(false),
        Some(other) => Err(ActionError::Restore(format!(
            "Database {} entered state {}",
            target_db, other
        ))),
        None => Err(ActionError::Restore(format!(
            "Database {} missing after restore",
            target_db
        ))),
    }
}

#[async_trait]
impl RemoteDatabase for SqlCmd {
    async fn probe_reachable(&self, server: &str, credentials: &Credentials, deadline: Duration) -> bool {
        let login_timeout = deadline.as_secs().max(1);
        let command = self.query_command(server, credentials, login_timeout, "SELECT 1");
        match tokio::time::timeout(deadline, command.run()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Reachability check of {} failed: {}", server, e);
                false
            }
            Err(_) => false,
        }
    }

    async fn restore_from_url(
        &self,
        server: &str,
        credentials: &Credentials,
        target_db: &str,
        source: &SignedUrl,
    ) -> Result<(), ActionError> {
        let statements = Self::restore_statements(target_db, source);
        ToolCommand::new(&self.program)
            .args(["-S", server, "-U", credentials.user.as_str(), "-d", "master", "-b"])
            .arg("-Q")
            .secret_arg(statements)
            .secret_env("SQLCMDPASSWORD", credentials.password.clone())
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Restore))?;

        // restore from URL completes asynchronously on managed instances
        loop {
            let state = self.database_state(server, credentials, target_db).await?;
            if restore_finished(target_db, state.as_deref())? {
                info!("Database {} is online on {}", target_db, server);
                return Ok(());
            }
            debug!("Waiting for {} to finish restoring", target_db);
            tokio::time::sleep(RESTORE_POLL_INTERVAL).await;
        }
    }

    async fn database_exists(&self, server: &str, credentials: &Credentials, db: &str) -> Result<bool, ActionError> {
        let stdout = self
            .query(
                server,
                credentials,
                &format!(
                    "SET NOCOUNT ON; SELECT COUNT(*) FROM sys.databases WHERE name = {};",
                    quote_literal(db)
                ),
            )
            .await?;

        let count: u32 = first_line(&stdout)
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| ActionError::Restore(format!("Unexpected sqlcmd output: {}", stdout.trim())))?;
        Ok(count > 0)
    }

    async fn drop_database(&self, server: &str, credentials: &Credentials, db: &str) -> Result<(), ActionError> {
        info!("Dropping database {} on {}", db, server);
        self.query(server, credentials, &format!("DROP DATABASE {};", quote_ident(db)))
            .await?;
        Ok(())
    }
}
