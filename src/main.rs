use anyhow::{Context, Result};
use bak2cloud::adapters::Collaborators;
use bak2cloud::cli::commands::{HistoryCommand, ValidateCommand};
use bak2cloud::cli::output::*;
use bak2cloud::cli::{Cli, Command};
use bak2cloud::core::config::{ConfigSource, MigrationConfig};
use bak2cloud::core::{CancelFlag, Pipeline, RunStatus};
use bak2cloud::execution::{ExecutionEvent, PipelineRunner};
use bak2cloud::persistence::{AuditLog, BlobMirror, JsonlJournal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        None => run_migration(&cli).await?,
        Some(Command::Validate(cmd)) => validate_config(cmd, &cli)?,
        Some(Command::History(cmd)) => show_history(cmd).await?,
    }

    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(ConfigSource::default_path)
}

fn load_config(cli: &Cli) -> Result<MigrationConfig> {
    let path = config_path(cli);
    ConfigSource::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_migration(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    println!("{} Loaded migration: {}", INFO, style(&config.name).bold());

    let tools = Collaborators::from_tools(&config.tools);
    let pipeline = Pipeline::from_config(&config, &tools).context("Invalid migration configuration")?;

    // Audit sinks: local journal always, history database unless disabled
    let journal = Arc::new(JsonlJournal::new(&config.audit.dir));
    let mut audit = AuditLog::new().with_sink(journal.clone());

    #[cfg(feature = "sqlite")]
    if !cli.no_history {
        let store = bak2cloud::persistence::SqliteAuditStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        audit = audit.with_sink(Arc::new(store));
    }

    if config.audit.mirror {
        audit = audit.with_mirror(Arc::new(BlobMirror::new(
            tools.storage.clone(),
            &config.storage.account,
            &config.storage.container,
            &config.audit.mirror_prefix,
        )));
    }

    // Ctrl-C stops the run at the next attempt boundary
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current attempt");
                cancel.cancel();
            }
        });
    }

    let progress = create_progress_bar(pipeline.stages().len());
    let bar = progress.clone();
    let mut runner = PipelineRunner::new(audit)
        .with_cancel_flag(cancel)
        .with_workdir(&config.workdir)
        .on_event(move |event| {
            bar.println(format_execution_event(event));
            match event {
                ExecutionEvent::StageStarted { stage_name, .. } => bar.set_message(stage_name.clone()),
                ExecutionEvent::StageSucceeded { .. } => bar.inc(1),
                _ => {}
            }
        });

    println!();
    let (run, report) = runner.run_with_report(&pipeline).await;
    progress.finish_and_clear();

    println!("\n{}", format_report(&report));
    println!(
        "\n{} Audit journal: {}",
        INFO,
        style(journal.summary_path(run.run_id).display()).dim()
    );

    if run.status == RunStatus::Succeeded {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&run.pipeline_name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&run.pipeline_name).bold(),
            style("failed").red()
        );
        if let Some(failure) = &run.failure {
            error!("{}: {}", failure.stage_name, failure.last_error);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_config(cmd: &ValidateCommand, cli: &Cli) -> Result<()> {
    println!("{} Validating configuration...", INFO);

    let result = load_config(cli).and_then(|config| {
        let tools = Collaborators::from_tools(&config.tools);
        let pipeline = Pipeline::from_config(&config, &tools)?;
        Ok((config, pipeline))
    });

    match result {
        Ok((config, pipeline)) => {
            let plan = pipeline.plan();
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
                return Ok(());
            }
            println!("{} Configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Target: {}", style(&config.target.endpoint.server).cyan());
            println!("  Stages: {}", style(plan.len()).cyan());
            println!("{}", format_plan(&plan));
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "sqlite")]
async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    use bak2cloud::persistence::SqliteAuditStore;

    let store = SqliteAuditStore::with_default_path().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some((entry, attempts)) => {
                if cmd.json {
                    let data = serde_json::json!({ "run": entry, "attempts": attempts });
                    println!("{}", serde_json::to_string_pretty(&data)?);
                    return Ok(());
                }
                println!("{} Run Details", INFO);
                println!("  ID: {}", style(entry.run_id).cyan());
                println!("  Migration: {}", style(&entry.pipeline_name).bold());
                println!("  Status: {}", format_status(entry.status));
                println!("  Started: {}", style(entry.started_at.to_rfc3339()).dim());
                if let Some(ended) = entry.ended_at {
                    println!("  Ended: {}", style(ended.to_rfc3339()).dim());
                }
                if let (Some(stage), Some(last_error)) = (&entry.failed_stage, &entry.last_error) {
                    println!("  Failed stage: {}", style(stage).red());
                    println!("  Last error: {}", last_error);
                }
                println!("\n  {}", style("Attempts:").bold());
                for attempt in &attempts {
                    println!("{}", format_attempt(attempt));
                }
            }
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.limit).await?;
    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for entry in &runs {
            println!("  {}", format_history_entry(entry));
        }
    }

    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn show_history(_cmd: &HistoryCommand) -> Result<()> {
    println!("{} Run history requires the `sqlite` feature", WARN);
    Ok(())
}
