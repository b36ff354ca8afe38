//! Subprocess plumbing shared by the CLI-backed collaborators

use crate::core::{config::Secret, error::ActionError};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Why an external tool invocation failed
#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("{program} not found on PATH")]
    NotFound { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },
}

impl ToolFailure {
    /// Map into an action error, using `categorize` for non-zero exits
    pub fn into_action_error(self, categorize: fn(String) -> ActionError) -> ActionError {
        match self {
            ToolFailure::NotFound { .. } => ActionError::Configuration(self.to_string()),
            ToolFailure::Spawn { ref program, .. } => ActionError::Tool {
                tool: program.clone(),
                message: self.to_string(),
            },
            ToolFailure::Exit { .. } => categorize(self.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Arg {
    Plain(String),
    Secret(String),
}

/// A command line for an external tool, with secret arguments redacted in logs
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<Arg>,
    envs: Vec<(String, Secret)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// An argument that must not appear in logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Secret(arg.into()));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.envs.push((key.into(), value));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument values as passed to the process
    pub fn raw_args(&self) -> Vec<&str> {
        self.args
            .iter()
            .map(|a| match a {
                Arg::Plain(s) | Arg::Secret(s) => s.as_str(),
            })
            .collect()
    }

    /// Command line with secrets replaced by `***`
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            match arg {
                Arg::Plain(s) => line.push_str(s),
                Arg::Secret(_) => line.push_str("***"),
            }
        }
        line
    }

    /// Run to completion and capture stdout
    ///
    /// The child is killed if the returned future is dropped, which is what
    /// happens when a stage deadline expires.
    pub async fn run(&self) -> Result<String, ToolFailure> {
        debug!("Running: {}", self.display());

        let mut command = Command::new(&self.program);
        command
            .args(self.raw_args())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value.expose());
        }

        let output = command.output().await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolFailure::NotFound {
                    program: self.program.clone(),
                }
            } else {
                ToolFailure::Spawn {
                    program: self.program.clone(),
                    source,
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, code, stderr);
            return Err(ToolFailure::Exit {
                program: self.program.clone(),
                code,
                // some tools (sqlcmd) report errors on stdout
                stderr: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("{} returned {} bytes of output", self.program, stdout.len());
        Ok(stdout)
    }
}
