//! Pipeline runner - drives stages in order and owns the run record

use crate::core::{
    context::{ActionContext, CancelFlag},
    pipeline::Pipeline,
    state::{PipelineRun, RunStatus, StageFailure, CANCELLED_DETAIL},
};
use crate::execution::executor::{StageExecutor, StageResult};
use crate::persistence::{AuditLog, RunReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_stages: usize,
    },
    StageStarted {
        stage_name: String,
        index: usize,
        total_stages: usize,
    },
    AttemptStarted {
        stage_name: String,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFailed {
        stage_name: String,
        attempt: u32,
        error: String,
        retry_in: Duration,
    },
    StageSucceeded {
        stage_name: String,
        attempts: u32,
        artifact_ref: Option<String>,
    },
    StageFailed {
        stage_name: String,
        attempts: u32,
        error: String,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        elapsed: Duration,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out of execution events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<EventHandler>,
}

impl EventBus {
    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }
}

/// Runs a pipeline to completion or first failure
pub struct PipelineRunner {
    audit: AuditLog,
    events: EventBus,
    cancel: CancelFlag,
    workdir: PathBuf,
    snapshot: watch::Sender<Option<PipelineRun>>,
}

impl PipelineRunner {
    pub fn new(audit: AuditLog) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            audit,
            events: EventBus::default(),
            cancel: CancelFlag::new(),
            workdir: PathBuf::from("."),
            snapshot,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Add an event handler
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
        self
    }

    /// Receiver of read-only run snapshots, updated at every state change
    pub fn subscribe(&self) -> watch::Receiver<Option<PipelineRun>> {
        self.snapshot.subscribe()
    }

    /// Latest published state of the current (or last) run
    pub fn snapshot(&self) -> Option<PipelineRun> {
        self.snapshot.borrow().clone()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn publish(&self, run: &PipelineRun) {
        self.snapshot.send_replace(Some(run.clone()));
    }

    /// Execute every stage in order. Stops at the first stage that exhausts its attempts.
    pub async fn run(&mut self, pipeline: &Pipeline) -> PipelineRun {
        let mut run = PipelineRun::new(pipeline.name.clone(), pipeline.plan());
        let total_stages = pipeline.stages().len();

        info!("Starting pipeline run: {} ({})", run.pipeline_name, run.run_id);
        run.start();
        self.publish(&run);
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
            total_stages,
        });

        if let Err(e) = self.audit.begin(&run).await {
            error!("Audit log unavailable: {}", e);
            run.fail(StageFailure {
                stage_name: pipeline.stages().first().map(|s| s.name.clone()).unwrap_or_default(),
                attempts: 0,
                last_error: format!("audit log write failed: {}", e),
            });
        }

        let executor = StageExecutor::new(self.events.clone());

        for (index, stage) in pipeline.stages().iter().enumerate() {
            if run.status != RunStatus::Running {
                break;
            }
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before stage {}", stage.name);
                run.fail(StageFailure {
                    stage_name: stage.name.clone(),
                    attempts: 0,
                    last_error: CANCELLED_DETAIL.to_string(),
                });
                break;
            }

            run.enter_stage(&stage.name);
            self.publish(&run);
            self.events.emit(ExecutionEvent::StageStarted {
                stage_name: stage.name.clone(),
                index,
                total_stages,
            });

            let ctx = ActionContext::new(run.run_id, &stage.name, self.workdir.clone(), self.cancel.clone());
            let result = executor.run(stage, &mut run, &mut self.audit, &ctx).await;

            let failure = match result {
                Ok(StageResult::Succeeded { attempts, artifact_ref }) => {
                    self.publish(&run);
                    self.events.emit(ExecutionEvent::StageSucceeded {
                        stage_name: stage.name.clone(),
                        attempts,
                        artifact_ref,
                    });
                    continue;
                }
                Ok(StageResult::Exhausted { attempts, last_error }) => StageFailure {
                    stage_name: stage.name.clone(),
                    attempts,
                    last_error,
                },
                Ok(StageResult::Cancelled { attempts }) => StageFailure {
                    stage_name: stage.name.clone(),
                    attempts,
                    last_error: CANCELLED_DETAIL.to_string(),
                },
                Err(e) => {
                    error!("Failed to persist attempt of {}: {}", stage.name, e);
                    StageFailure {
                        stage_name: stage.name.clone(),
                        attempts: run.attempts_for(&stage.name).count() as u32,
                        last_error: format!("audit log write failed: {}", e),
                    }
                }
            };

            error!(
                "Stage {} failed after {} attempt(s): {}",
                failure.stage_name, failure.attempts, failure.last_error
            );
            self.events.emit(ExecutionEvent::StageFailed {
                stage_name: failure.stage_name.clone(),
                attempts: failure.attempts,
                error: failure.last_error.clone(),
            });
            run.fail(failure);
        }

        run.succeed();
        self.publish(&run);

        info!(
            "Pipeline run finished: {} - {:?} in {:.1}s",
            run.pipeline_name,
            run.status,
            run.elapsed().as_secs_f64()
        );
        self.events.emit(ExecutionEvent::RunFinished {
            run_id: run.run_id,
            status: run.status,
            elapsed: run.elapsed(),
        });

        if let Err(e) = self.audit.finish(&run).await {
            error!("Failed to persist run summary for {}: {}", run.run_id, e);
        }

        run
    }

    /// Run and build the final report in one call
    pub async fn run_with_report(&mut self, pipeline: &Pipeline) -> (PipelineRun, RunReport) {
        let run = self.run(pipeline).await;
        let report = RunReport::from_run(&run);
        (run, report)
    }
}
