//! Stage domain model

use crate::adapters::ExternalAction;
use crate::core::state::StagePlan;
use crate::execution::backoff::Backoff;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A named step of a pipeline: one external action plus its retry policy
#[derive(Clone)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// The operation this stage performs
    pub action: Arc<dyn ExternalAction>,

    /// Deadline for a single attempt, retry pre-check included
    pub timeout: Duration,

    /// Attempts before the stage is considered failed (at least 1)
    pub max_attempts: u32,

    /// Wait between a failed attempt and the next
    pub backoff: Backoff,
}

impl Stage {
    pub fn new(name: impl Into<String>, action: Arc<dyn ExternalAction>) -> Self {
        Self {
            name: name.into(),
            action,
            timeout: StageDefaults::default().timeout,
            max_attempts: StageDefaults::default().max_attempts,
            backoff: Backoff::none(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Serializable description used in run records
    pub fn plan(&self) -> StagePlan {
        StagePlan {
            name: self.name.clone(),
            action: self.action.kind().to_string(),
            timeout_secs: self.timeout.as_secs(),
            max_attempts: self.max_attempts,
            leftover: self.action.contract().leftover.to_string(),
            residue: self.action.contract().residue.to_string(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("action", &self.action.kind())
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}
