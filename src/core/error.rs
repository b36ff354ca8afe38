//! Error taxonomy for configuration, external actions and the audit log

use thiserror::Error;

/// Missing or invalid setup. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required setting '{field}'")]
    Missing { field: String },

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Stage '{0}' is listed more than once")]
    DuplicateStage(String),
}

impl ConfigError {
    pub fn missing(field: impl Into<String>) -> Self {
        ConfigError::Missing { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by external collaborators and the actions wrapping them
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("Server {server} not reachable within {waited_secs}s")]
    Unreachable { server: String, waited_secs: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Failed to run {tool}: {message}")]
    Tool { tool: String, message: String },
}

impl ActionError {
    /// Whether another attempt may be made after this error.
    ///
    /// Configuration and authentication failures end the stage immediately,
    /// as does cancellation.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::Configuration(_) | ActionError::Auth(_) | ActionError::Cancelled
        )
    }
}

/// Failure to persist an attempt record to a durable sink
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit store error: {0}")]
    Store(String),
}
