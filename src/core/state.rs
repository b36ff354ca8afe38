//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is executing stages
    Running,
    /// Every stage succeeded
    Succeeded,
    /// A stage exhausted its attempts, or the run was cancelled
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// Result of a single attempt of a stage's action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub produced_artifact_ref: Option<String>,
    pub error_detail: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(produced_artifact_ref: Option<String>) -> Self {
        Self {
            success: true,
            produced_artifact_ref,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            produced_artifact_ref: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn timed_out() -> Self {
        Self::failed(TIMEOUT_DETAIL)
    }
}

/// Error detail recorded for an attempt that ran past its stage deadline
pub const TIMEOUT_DETAIL: &str = "timeout";

/// Error detail recorded when the operator cancels the run
pub const CANCELLED_DETAIL: &str = "cancelled";

/// One execution try of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub stage_name: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: ActionOutcome,
}

impl AttemptRecord {
    pub fn duration(&self) -> Duration {
        self.ended_at
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Serializable description of a stage, captured at run start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub name: String,
    pub action: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// What the action leaves behind once it completed
    #[serde(default)]
    pub leftover: String,
    /// Partial state the action may leave behind on failure
    pub residue: String,
}

/// Terminal error of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage_name: String,
    pub attempts: u32,
    pub last_error: String,
}

/// A single run of a pipeline
///
/// Only the runner mutates this value. Attempts are append-only and ordered
/// by stage, then by attempt number within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stages: Vec<StagePlan>,
    attempts: Vec<AttemptRecord>,
    pub overall_start: Option<DateTime<Utc>>,
    pub overall_end: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Stage currently executing, if any
    pub current_stage: Option<String>,
    pub failure: Option<StageFailure>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, stages: Vec<StagePlan>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            stages,
            attempts: Vec::new(),
            overall_start: None,
            overall_end: None,
            status: RunStatus::Pending,
            current_stage: None,
            failure: None,
        }
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Attempts belonging to one stage, in attempt order
    pub fn attempts_for<'a>(&'a self, stage_name: &'a str) -> impl Iterator<Item = &'a AttemptRecord> {
        self.attempts.iter().filter(move |a| a.stage_name == stage_name)
    }

    /// Mark run as started
    pub fn start(&mut self) {
        debug_assert_eq!(self.status, RunStatus::Pending);
        self.status = RunStatus::Running;
        self.overall_start = Some(Utc::now());
    }

    pub(crate) fn push_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub fn enter_stage(&mut self, stage_name: &str) {
        self.current_stage = Some(stage_name.to_string());
    }

    /// Mark run as succeeded
    pub fn succeed(&mut self) {
        if self.status != RunStatus::Running {
            return;
        }
        self.status = RunStatus::Succeeded;
        self.current_stage = None;
        self.overall_end = Some(Utc::now());
    }

    /// Mark run as failed. The first failure wins.
    pub fn fail(&mut self, failure: StageFailure) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Failed;
        self.current_stage = None;
        self.failure = Some(failure);
        self.overall_end = Some(Utc::now());
    }

    /// Wall-clock duration of the run so far
    pub fn elapsed(&self) -> Duration {
        match self.overall_start {
            Some(start) => self
                .overall_end
                .unwrap_or_else(Utc::now)
                .signed_duration_since(start)
                .to_std()
                .unwrap_or_default(),
            None => Duration::ZERO,
        }
    }

    /// Names of stages whose final attempt succeeded, in run order
    pub fn succeeded_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| {
                self.attempts_for(name)
                    .last()
                    .is_some_and(|a| a.outcome.success)
            })
            .collect()
    }

    pub fn stage_plan(&self, name: &str) -> Option<&StagePlan> {
        self.stages.iter().find(|s| s.name == name)
    }
}
