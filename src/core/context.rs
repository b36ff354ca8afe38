//! Per-attempt action context and cooperative cancellation

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shared flag for operator-initiated abort
///
/// Checked at stage boundaries, before every attempt and inside probe
/// loops. An in-flight external call is not interrupted by the flag; it is
/// bounded only by the stage deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Immutable context handed to an action for one attempt
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub run_id: Uuid,
    pub stage_name: String,
    pub attempt: u32,
    /// Scratch directory for local artifacts
    pub workdir: PathBuf,
    pub cancel: CancelFlag,
}

impl ActionContext {
    pub fn new(run_id: Uuid, stage_name: impl Into<String>, workdir: PathBuf, cancel: CancelFlag) -> Self {
        Self {
            run_id,
            stage_name: stage_name.into(),
            attempt: 1,
            workdir,
            cancel,
        }
    }

    /// Same context, for a later attempt
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}
