//! CLI command definitions

use clap::Args;

/// Validate the configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output the stage plan in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: u32,

    /// Show one run with all of its attempts
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
