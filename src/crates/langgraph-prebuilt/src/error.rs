//! Errors raised while validating plan definitions and materializing them
//! into execution graphs.

use thiserror::Error;

/// Result type for plan construction operations.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Error, Debug)]
pub enum PlanError {
    /// No plan with the requested id is registered.
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// A goal was given but no enabled plan's input conditions matched it.
    #[error("no plan matched the given goal")]
    NoMatchingPlan,

    /// A plan definition failed schema or structural validation.
    #[error("invalid plan '{plan_id}': {reason}")]
    InvalidPlan { plan_id: String, reason: String },

    /// Two plans in the same collection share an id.
    #[error("duplicate plan id: {0}")]
    DuplicatePlanId(String),

    /// An `expression` input condition could not be parsed or evaluated.
    #[error("invalid match expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// Building the `ExecutionGraph` for a selected plan failed.
    #[error("failed to materialize plan '{plan_id}': {source}")]
    PlanMaterializationFailed {
        plan_id: String,
        #[source]
        source: langgraph_core::GraphError,
    },

    /// A regex pattern inside an input condition or `${...}` template failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Serialization error while handling plan variables.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
