//! Audit log: append-only attempt records, their summary, and the sinks they are persisted to

pub mod journal;
pub mod mirror;

#[cfg(feature = "sqlite")]
pub mod store;

pub use journal::JsonlJournal;
pub use mirror::BlobMirror;

#[cfg(feature = "sqlite")]
pub use store::{RunHistory, SqliteAuditStore};

use crate::core::{
    error::AuditError,
    state::{AttemptRecord, PipelineRun, RunStatus, StageFailure},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Durable destination for attempt records
///
/// A write failure here is fatal to the run: the attempt record is part of
/// the stage contract, not best-effort logging.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Called once before the first stage runs
    async fn begin_run(&self, _run: &PipelineRun) -> Result<(), AuditError> {
        Ok(())
    }

    /// Persist one attempt
    async fn append(&self, run_id: Uuid, record: &AttemptRecord) -> Result<(), AuditError>;

    /// Persist the final report of a finished run
    async fn finish_run(&self, report: &RunReport) -> Result<(), AuditError>;
}

/// Optional remote copy of the run report. Failures only degrade observability.
#[async_trait::async_trait]
pub trait AuditMirror: Send + Sync {
    async fn publish(&self, report: &RunReport) -> Result<(), AuditError>;
}

/// Per-stage figures derived from attempt records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_name: String,
    pub attempts: u32,
    pub failures: u32,
    /// Whether the last attempt succeeded
    pub succeeded: bool,
    /// Sum of attempt durations, backoff excluded
    pub duration_ms: u64,
}

/// Summary computable at any point from the attempt records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub stages: Vec<StageSummary>,
    pub total_attempts: u32,
    pub successes: u32,
    pub failures: u32,
    /// First attempt start to last attempt end
    pub total_duration_ms: u64,
}

impl AuditSummary {
    pub fn from_attempts(records: &[AttemptRecord]) -> Self {
        let mut stages: Vec<StageSummary> = Vec::new();
        for record in records {
            let duration_ms = record.duration().as_millis() as u64;
            match stages.iter_mut().find(|s| s.stage_name == record.stage_name) {
                Some(stage) => {
                    stage.attempts += 1;
                    stage.duration_ms += duration_ms;
                    stage.succeeded = record.outcome.success;
                    if !record.outcome.success {
                        stage.failures += 1;
                    }
                }
                None => stages.push(StageSummary {
                    stage_name: record.stage_name.clone(),
                    attempts: 1,
                    failures: u32::from(!record.outcome.success),
                    succeeded: record.outcome.success,
                    duration_ms,
                }),
            }
        }

        let successes = records.iter().filter(|r| r.outcome.success).count() as u32;
        let total_duration_ms = match (records.first(), records.last()) {
            (Some(first), Some(last)) => last
                .ended_at
                .signed_duration_since(first.started_at)
                .to_std()
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            _ => 0,
        };

        Self {
            stages,
            total_attempts: records.len() as u32,
            successes,
            failures: records.len() as u32 - successes,
            total_duration_ms,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage_name == name)
    }
}

/// State a human or compensating stage must deal with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupNote {
    pub stage_name: String,
    /// What a completed stage left behind, or the partial state of the failed one
    pub residue: String,
    /// True for the stage that failed, false for stages that completed before it
    pub failed_stage: bool,
}

/// Final, persisted account of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub summary: AuditSummary,
    /// First failing stage, attempts made and last error verbatim
    pub failure: Option<StageFailure>,
    /// Empty unless the run failed. Nothing is rolled back automatically.
    pub cleanup: Vec<CleanupNote>,
    pub attempts: Vec<AttemptRecord>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let cleanup = match &run.failure {
            Some(failure) => {
                let mut notes: Vec<CleanupNote> = run
                    .succeeded_stages()
                    .into_iter()
                    .filter_map(|name| run.stage_plan(name))
                    .map(|plan| CleanupNote {
                        stage_name: plan.name.clone(),
                        residue: plan.leftover.clone(),
                        failed_stage: false,
                    })
                    .collect();
                if let Some(plan) = run.stage_plan(&failure.stage_name) {
                    notes.push(CleanupNote {
                        stage_name: plan.name.clone(),
                        residue: plan.residue.clone(),
                        failed_stage: true,
                    });
                }
                notes.retain(|n| n.residue != "none");
                notes
            }
            None => Vec::new(),
        };

        Self {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            started_at: run.overall_start,
            ended_at: run.overall_end,
            elapsed_ms: run.elapsed().as_millis() as u64,
            summary: AuditSummary::from_attempts(run.attempts()),
            failure: run.failure.clone(),
            cleanup,
            attempts: run.attempts().to_vec(),
        }
    }
}

/// Append-only attempt log fanned out to durable sinks and an optional mirror
#[derive(Default)]
pub struct AuditLog {
    records: Vec<AttemptRecord>,
    sinks: Vec<Arc<dyn AuditSink>>,
    mirror: Option<Arc<dyn AuditMirror>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn AuditMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub async fn begin(&mut self, run: &PipelineRun) -> Result<(), AuditError> {
        self.records.clear();
        for sink in &self.sinks {
            sink.begin_run(run).await?;
        }
        Ok(())
    }

    /// Append one attempt and persist it to every sink before returning
    pub async fn record(&mut self, run_id: Uuid, record: AttemptRecord) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.append(run_id, &record).await?;
            debug!(
                "Recorded {} attempt {} in {}",
                record.stage_name,
                record.attempt_number,
                sink.name()
            );
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn summary(&self) -> AuditSummary {
        AuditSummary::from_attempts(&self.records)
    }

    /// Persist the final report to every sink, then the mirror.
    ///
    /// A failing sink does not stop the others; the first sink error is
    /// returned once all of them were tried. A mirror failure is logged and swallowed.
    pub async fn finish(&self, run: &PipelineRun) -> Result<RunReport, AuditError> {
        let report = RunReport::from_run(run);
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.finish_run(&report).await {
                error!("Could not write run report {} to {}: {}", report.run_id, sink.name(), e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.publish(&report).await {
                warn!("Could not mirror run report for {}: {}", report.run_id, e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// In-memory sink (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: tokio::sync::RwLock<Vec<(Uuid, AttemptRecord)>>,
    reports: tokio::sync::RwLock<Vec<RunReport>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AttemptRecord> {
        self.records.read().await.iter().map(|(_, r)| r.clone()).collect()
    }

    pub async fn reports(&self) -> Vec<RunReport> {
        self.reports.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for InMemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, run_id: Uuid, record: &AttemptRecord) -> Result<(), AuditError> {
        self.records.write().await.push((run_id, record.clone()));
        Ok(())
    }

    async fn finish_run(&self, report: &RunReport) -> Result<(), AuditError> {
        self.reports.write().await.push(report.clone());
        Ok(())
    }
}
