//! Core domain models for bak2cloud
//!
//! This module defines the fundamental data structures that represent
//! migration pipelines, their stages, and the record of a run.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
