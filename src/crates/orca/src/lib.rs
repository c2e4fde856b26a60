//! # Orca - orchestrator CLI client
//!
//! A thin `clap`-based command-line client for the orchestrator control
//! plane. Orca submits a goal to the orchestrator's HTTP API and tails the
//! resulting plan's server-sent-events stream, printing each step
//! transition as it arrives.
//!
//! Orca holds no state of its own: no database, no in-process tool
//! execution, no LLM calls. Everything it prints is decoded off the wire
//! from the orchestrator; see [`events::PlanEvent`] for the event shape and
//! [`client::OrchestratorClient`] for the HTTP calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orca::{OrcaConfig, OrchestratorClient, SubmitPlanRequest};
//!
//! # async fn example() -> orca::Result<()> {
//! let config = OrcaConfig::load()?;
//! let client = OrchestratorClient::new(&config)?;
//!
//! let submission = client.submit_plan(SubmitPlanRequest::new("ship the release")).await?;
//! println!("submitted plan {}", submission.plan_id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod error;
pub mod events;
pub mod shutdown;
pub mod version;

pub use client::OrchestratorClient;
pub use config::OrcaConfig;
pub use error::{OrcaError, Result};
pub use events::{PlanEvent, PlanSubmission, StepSnapshot, StepState, SubmitPlanRequest};
pub use shutdown::ShutdownCoordinator;
pub use version::{full_version as version_info, short_version, VersionInfo};
