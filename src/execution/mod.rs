//! Pipeline execution engine

pub mod backoff;
pub mod engine;
pub mod executor;
pub mod probe;

pub use backoff::Backoff;
pub use engine::{EventBus, EventHandler, ExecutionEvent, PipelineRunner};
pub use executor::{StageExecutor, StageResult};
pub use probe::{wait_until_reachable, ProbePolicy};
