//! Plan definitions, validation, and goal-to-graph materialization.
//!
//! This crate sits between the raw DAG engine in `langgraph-core` and a
//! deployment's configured workflows: a [`plan::PlanDefinition`] describes a
//! workflow declaratively (steps, dependencies, input templates), and
//! [`plan::PlanFactory`] resolves an incoming goal to a definition and
//! materializes it into an `ExecutionGraph` ready to run.
//!
//! ```rust,ignore
//! use langgraph_prebuilt::plan::{CreatePlanOptions, PlanFactory};
//!
//! let factory = PlanFactory::new(plans)?;
//! let instance = factory.create_plan(CreatePlanOptions {
//!     goal: "summarize the incident".to_string(),
//!     ..Default::default()
//! }).await?;
//! instance.graph.execute(None).await?;
//! ```

pub mod error;
pub mod expression;
pub mod plan;

pub use error::{PlanError, Result};
pub use plan::{
    CreatePlanOptions, InputCondition, PlanDefinition, PlanFactory, PlanInstance,
    PlanStepDefinition, PlanValidator, WorkflowType,
};
