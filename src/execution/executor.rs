//! Stage executor - runs one stage's action under its timeout and retry policy

use crate::core::{
    context::{ActionContext, CancelFlag},
    error::{ActionError, AuditError},
    stage::Stage,
    state::{ActionOutcome, AttemptRecord, PipelineRun, CANCELLED_DETAIL, TIMEOUT_DETAIL},
};
use crate::execution::engine::{EventBus, ExecutionEvent};
use crate::persistence::AuditLog;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// How often the cancel flag is checked while waiting out a backoff delay
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal result of running a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    /// An attempt succeeded
    Succeeded {
        attempts: u32,
        artifact_ref: Option<String>,
    },
    /// Attempts ran out, or the last error was not retryable
    Exhausted { attempts: u32, last_error: String },
    /// Cancel flag observed before or during an attempt
    Cancelled { attempts: u32 },
}

/// How a single attempt ended
enum AttemptEnd {
    Success(Option<String>),
    Failure { detail: String, retryable: bool },
    TimedOut,
    Cancelled,
}

/// Sleep for `delay`, returning early once `cancel` is raised
async fn wait_out_backoff(delay: Duration, cancel: &CancelFlag) {
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL_INTERVAL)).await;
    }
}

/// Executes a single stage
pub struct StageExecutor {
    events: EventBus,
}

impl StageExecutor {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Run `stage` until it succeeds or exhausts its attempts.
    ///
    /// Every attempt is appended to `run` and persisted to `audit` before the
    /// next one starts. Errors from the action never escape; only a failure to
    /// persist an attempt is returned as `Err`.
    pub async fn run(
        &self,
        stage: &Stage,
        run: &mut PipelineRun,
        audit: &mut AuditLog,
        ctx: &ActionContext,
    ) -> Result<StageResult, AuditError> {
        let max_attempts = stage.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if ctx.cancel.is_cancelled() {
                info!("Stage {} cancelled before attempt {}", stage.name, attempt);
                return Ok(StageResult::Cancelled { attempts: attempt - 1 });
            }

            self.events.emit(ExecutionEvent::AttemptStarted {
                stage_name: stage.name.clone(),
                attempt,
                max_attempts,
            });

            let attempt_ctx = ctx.for_attempt(attempt);
            let started_at = Utc::now();
            let end = self.attempt(stage, &attempt_ctx).await;
            let ended_at = Utc::now();

            let outcome = match &end {
                AttemptEnd::Success(artifact) => ActionOutcome::succeeded(artifact.clone()),
                AttemptEnd::Failure { detail, .. } => ActionOutcome::failed(detail.clone()),
                AttemptEnd::TimedOut => ActionOutcome::timed_out(),
                AttemptEnd::Cancelled => ActionOutcome::failed(CANCELLED_DETAIL),
            };
            let record = AttemptRecord {
                stage_name: stage.name.clone(),
                attempt_number: attempt,
                started_at,
                ended_at,
                outcome,
            };
            run.push_attempt(record.clone());
            audit.record(run.run_id, record).await?;

            let (detail, retryable) = match end {
                AttemptEnd::Success(artifact_ref) => {
                    info!("Stage {} succeeded on attempt {}", stage.name, attempt);
                    return Ok(StageResult::Succeeded {
                        attempts: attempt,
                        artifact_ref,
                    });
                }
                AttemptEnd::Cancelled => {
                    return Ok(StageResult::Cancelled { attempts: attempt });
                }
                AttemptEnd::TimedOut => {
                    // the external operation may still be running
                    error!(
                        "Stage {} attempt {} timed out after {}s",
                        stage.name,
                        attempt,
                        stage.timeout.as_secs()
                    );
                    (TIMEOUT_DETAIL.to_string(), true)
                }
                AttemptEnd::Failure { detail, retryable } => {
                    error!("Stage {} attempt {} failed: {}", stage.name, attempt, detail);
                    (detail, retryable)
                }
            };

            if !retryable || attempt >= max_attempts {
                if !retryable {
                    warn!("Stage {} failed with a non-retryable error", stage.name);
                }
                return Ok(StageResult::Exhausted {
                    attempts: attempt,
                    last_error: detail,
                });
            }

            let delay = stage.backoff.delay_after(attempt);
            self.events.emit(ExecutionEvent::AttemptFailed {
                stage_name: stage.name.clone(),
                attempt,
                error: detail,
                retry_in: delay,
            });
            if !delay.is_zero() {
                debug!("Waiting {:?} before retrying {}", delay, stage.name);
                wait_out_backoff(delay, &ctx.cancel).await;
            }
        }
    }

    /// One attempt: retry pre-check (after the first) and the action, under one deadline
    async fn attempt(&self, stage: &Stage, ctx: &ActionContext) -> AttemptEnd {
        let action = &stage.action;
        let work = async {
            if ctx.attempt > 1 {
                if let Some(precheck) = action.contract().retry_precheck {
                    info!("Stage {} retry pre-check: {}", stage.name, precheck);
                }
                if let Err(e) = action.prepare_retry(ctx).await {
                    return Err(e);
                }
            }
            action.execute(ctx).await
        };

        match timeout(stage.timeout, work).await {
            Ok(Ok(artifact)) => AttemptEnd::Success(artifact),
            Ok(Err(ActionError::Cancelled)) => AttemptEnd::Cancelled,
            Ok(Err(e)) => AttemptEnd::Failure {
                retryable: e.is_retryable(),
                detail: e.to_string(),
            },
            Err(_) => AttemptEnd::TimedOut,
        }
    }
}
