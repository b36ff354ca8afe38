//! CLI output formatting

use crate::{
    core::state::{AttemptRecord, RunStatus, StagePlan},
    execution::ExecutionEvent,
    persistence::RunReport,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the stages of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `4.2s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_stages,
        } => format!(
            "{}Starting migration {} ({}) - {} stages",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_stages
        ),
        ExecutionEvent::StageStarted {
            stage_name,
            index,
            total_stages,
        } => format!(
            "{}[{}/{}] {}",
            SPINNER,
            index + 1,
            total_stages,
            style(stage_name).cyan()
        ),
        ExecutionEvent::AttemptStarted {
            stage_name,
            attempt,
            max_attempts,
        } => {
            if *attempt > 1 {
                format!(
                    "{}{} (attempt {}/{})",
                    SPINNER,
                    style(stage_name).cyan(),
                    attempt,
                    max_attempts
                )
            } else {
                format!("{}{}", SPINNER, style(stage_name).dim())
            }
        }
        ExecutionEvent::AttemptFailed {
            stage_name,
            attempt,
            error,
            retry_in,
        } => format!(
            "{}{} attempt {} failed: {} (retrying in {})",
            WARN,
            style(stage_name).yellow(),
            attempt,
            style(error).dim(),
            format_duration(*retry_in)
        ),
        ExecutionEvent::StageSucceeded {
            stage_name,
            attempts,
            artifact_ref,
        } => {
            let mut line = format!("{}{}", CHECK, style(stage_name).green());
            if *attempts > 1 {
                line.push_str(&format!(" after {} attempts", attempts));
            }
            if let Some(artifact) = artifact_ref {
                line.push_str(&format!(" → {}", style(artifact).dim()));
            }
            line
        }
        ExecutionEvent::StageFailed {
            stage_name,
            attempts,
            error,
        } => format!(
            "{}{} failed after {} attempt(s): {}",
            CROSS,
            style(stage_name).red(),
            attempts,
            style(error).dim()
        ),
        ExecutionEvent::RunFinished {
            run_id,
            status,
            elapsed,
        } => format!(
            "{}Migration ({}) {} in {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status),
            format_duration(*elapsed)
        ),
    }
}

/// Format one attempt record as a table row
pub fn format_attempt(record: &AttemptRecord) -> String {
    let icon = if record.outcome.success { CHECK } else { CROSS };
    let mut line = format!(
        "  {}{:<24} #{:<2} {:>10}",
        icon,
        record.stage_name,
        record.attempt_number,
        format_duration(record.duration())
    );
    if let Some(detail) = &record.outcome.error_detail {
        line.push_str(&format!("  {}", style(detail).dim()));
    } else if let Some(artifact) = &record.outcome.produced_artifact_ref {
        line.push_str(&format!("  {}", style(artifact).dim()));
    }
    line
}

/// Format the final report of a run
pub fn format_report(report: &RunReport) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "{} {} - {} - {}",
        style(short_id(&report.run_id)).dim(),
        style(&report.pipeline_name).bold(),
        format_status(report.status),
        format_duration(Duration::from_millis(report.elapsed_ms))
    ));
    out.push(format!(
        "  {} attempts, {} succeeded, {} failed",
        report.summary.total_attempts, report.summary.successes, report.summary.failures
    ));

    for stage in &report.summary.stages {
        let icon = if stage.succeeded { CHECK } else { CROSS };
        out.push(format!(
            "  {}{:<24} {} attempt(s) {:>10}",
            icon,
            stage.stage_name,
            stage.attempts,
            format_duration(Duration::from_millis(stage.duration_ms))
        ));
    }

    if let Some(failure) = &report.failure {
        out.push(String::new());
        out.push(format!(
            "{}Failed stage: {} after {} attempt(s)",
            CROSS,
            style(&failure.stage_name).red().bold(),
            failure.attempts
        ));
        out.push(format!("  Last error: {}", failure.last_error));
    }

    if !report.cleanup.is_empty() {
        out.push(String::new());
        out.push(format!("{}Manual cleanup may be needed:", WARN));
        for note in &report.cleanup {
            let marker = if note.failed_stage { " (failed)" } else { "" };
            out.push(format!("  - {}{}: {}", note.stage_name, marker, note.residue));
        }
    }

    out.join("\n")
}

/// Format the stage plan printed by `validate`
pub fn format_plan(plan: &[StagePlan]) -> String {
    plan.iter()
        .enumerate()
        .map(|(i, stage)| {
            format!(
                "  {:>2}. {:<24} {:<20} timeout {:>6} · {} attempt(s)",
                i + 1,
                style(&stage.name).cyan(),
                style(&stage.action).dim(),
                format_duration(Duration::from_secs(stage.timeout_secs)),
                stage.max_attempts
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format one row of `history`
#[cfg(feature = "sqlite")]
pub fn format_history_entry(entry: &crate::persistence::RunHistory) -> String {
    let icon = match entry.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };
    let mut line = format!(
        "{}{} - {} - {} - {} - {} attempt(s)",
        icon,
        style(&entry.run_id.to_string()[..8]).dim(),
        style(&entry.pipeline_name).bold(),
        format_status(entry.status),
        entry.started_at.format("%Y-%m-%d %H:%M:%S"),
        entry.attempts
    );
    if let Some(stage) = &entry.failed_stage {
        line.push_str(&format!(" - failed at {}", style(stage).red()));
    }
    line
}
