//! Orchestrator service: plan event fan-out and policy decision caching.
//!
//! This crate hosts the orchestrator-side subsystems of the runtime: the
//! per-plan event log with server-sent-events fan-out ([`events`]) and the
//! two-tier policy decision cache ([`policy_cache`]). Plan construction and
//! execution live in `langgraph-prebuilt` and `langgraph-core`; this crate
//! wires them to HTTP.

pub mod api;
pub mod config;
pub mod events;
pub mod policy_cache;
pub mod version;

use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Requested plan was not found.
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// Plan execution failed.
    #[error("plan execution failed: {0}")]
    ExecutionFailed(String),

    /// General configuration or I/O error.
    #[error("orchestrator error: {0}")]
    General(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Get version information.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
