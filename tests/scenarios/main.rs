//! Scenario-based tests for bak2cloud

#[allow(dead_code)]
mod helpers;

mod cancellation;
mod cleanup;
mod config_pipeline;
mod retry_behavior;
mod success_chain;
mod timeouts;
