//! Schema/data packaging tool (`sqlpackage`) backed packager

use crate::adapters::{process::ToolCommand, SchemaPackager};
use crate::core::{
    config::{Credentials, SizingOptions},
    error::ActionError,
};
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SqlPackage {
    program: String,
}

impl SqlPackage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn export_command(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        output_file: &Path,
    ) -> ToolCommand {
        ToolCommand::new(&self.program)
            .arg("/Action:Export")
            .arg(format!("/SourceServerName:{}", server))
            .arg(format!("/SourceDatabaseName:{}", db))
            .arg(format!("/SourceUser:{}", credentials.user))
            .secret_arg(format!("/SourcePassword:{}", credentials.password.expose()))
            .arg(format!("/TargetFile:{}", output_file.display()))
    }

    pub fn import_command(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        input_file: &Path,
        sizing: &SizingOptions,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program)
            .arg("/Action:Import")
            .arg(format!("/TargetServerName:{}", server))
            .arg(format!("/TargetDatabaseName:{}", db))
            .arg(format!("/TargetUser:{}", credentials.user))
            .secret_arg(format!("/TargetPassword:{}", credentials.password.expose()))
            .arg(format!("/SourceFile:{}", input_file.display()));

        if let Some(edition) = &sizing.edition {
            cmd = cmd.arg(format!("/p:DatabaseEdition={}", edition));
        }
        if let Some(objective) = &sizing.service_objective {
            cmd = cmd.arg(format!("/p:DatabaseServiceObjective={}", objective));
        }
        if let Some(max_size_gb) = sizing.max_size_gb {
            cmd = cmd.arg(format!("/p:DatabaseMaximumSize={}", max_size_gb));
        }
        cmd
    }
}

#[async_trait]
impl SchemaPackager for SqlPackage {
    async fn export(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        output_file: &Path,
    ) -> Result<(), ActionError> {
        self.export_command(server, db, credentials, output_file)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Packaging))?;
        Ok(())
    }

    async fn import(
        &self,
        server: &str,
        db: &str,
        credentials: &Credentials,
        input_file: &Path,
        sizing: &SizingOptions,
    ) -> Result<(), ActionError> {
        self.import_command(server, db, credentials, input_file, sizing)
            .run()
            .await
            .map_err(|e| e.into_action_error(ActionError::Packaging))?;
        Ok(())
    }
}
