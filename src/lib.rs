//! bak2cloud - moves a SQL Server backup into a managed cloud SQL database

pub mod adapters;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use adapters::{ActionContract, Collaborators, ExternalAction};
pub use core::config::{ConfigSource, MigrationConfig};
pub use core::{ActionError, AuditError, ConfigError, Pipeline, PipelineRun, RunStatus, Stage};
pub use execution::{Backoff, ExecutionEvent, PipelineRunner};
pub use persistence::{AuditLog, AuditSink, RunReport};
