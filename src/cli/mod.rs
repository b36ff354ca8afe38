//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Moves a SQL Server backup into a managed cloud SQL database
#[derive(Debug, Parser, Clone)]
#[command(name = "bak2cloud")]
#[command(version)]
#[command(
    about = "Moves a SQL Server backup into a managed cloud SQL database",
    long_about = "Runs the migration stages in order with per-stage timeout and retry. \
                  Without a subcommand the migration described by the configuration file is run."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the migration configuration (default: $BAK2CLOUD_CONFIG or ./bak2cloud.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Don't record the run in the local history database
    #[arg(long, global = true)]
    pub no_history: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate the configuration and print the stage plan
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
