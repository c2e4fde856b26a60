//! Error types for execution graph construction and running.
//!
//! All errors implement `std::error::Error` via `thiserror` and carry enough
//! context (node id, attempt count) to be logged or surfaced over SSE without
//! re-deriving it at the call site.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation         - graph construction / cycle / reference errors
//! ├── NodeExecution       - a node handler returned an error
//! ├── Execution           - execution-wide failure (no single node at fault)
//! ├── Blocked             - a node can never become ready (ancestor failed)
//! ├── StateError          - execution context read/write failure
//! ├── Checkpoint          - event log / checkpoint persistence failure
//! ├── Serialization       - JSON/YAML (de)serialization failure
//! ├── Configuration       - invalid or missing configuration
//! ├── Timeout             - operation exceeded its deadline
//! └── Custom              - escape hatch for caller-defined errors
//! ```
//!
//! # Examples
//!
//! ```rust
//! use langgraph_core::error::GraphError;
//!
//! fn handle(err: GraphError) {
//!     match err {
//!         GraphError::Validation(msg) => eprintln!("graph invalid: {}", msg),
//!         GraphError::NodeExecution { node, error } => {
//!             eprintln!("node '{}' failed: {}", node, error)
//!         }
//!         _ => eprintln!("error: {}", err),
//!     }
//! }
//! ```

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced while constructing or executing an [`crate::exec_graph::ExecutionGraph`].
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure is invalid: unknown dependency, duplicate id, or cycle.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A node's handler returned an error.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the node that failed.
        node: String,
        /// Error message reported by the handler.
        error: String,
    },

    /// Execution-wide failure not attributable to a single node.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A node can never run because an upstream dependency failed and
    /// `continue_on_error` was not set for that edge.
    #[error("node '{node}' blocked: upstream dependency '{dependency}' failed")]
    Blocked {
        /// Id of the node that will never run.
        node: String,
        /// Id of the failed dependency that blocks it.
        dependency: String,
    },

    /// Execution context read or write failure, with optional node context.
    #[error("context error{}: {error}", node.as_ref().map(|n| format!(" in node '{}'", n)).unwrap_or_default())]
    StateError {
        /// Optional node context where the error occurred.
        node: Option<String>,
        /// Error description.
        error: String,
    },

    /// Event log or checkpoint persistence failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] langgraph_checkpoint::CheckpointError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error, raised when loading plan or graph definitions.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure, typically while reading a definition file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Caller-defined error not covered by another variant.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Build a [`GraphError::NodeExecution`] from a node id and error message.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Build a [`GraphError::StateError`] with optional node context.
    pub fn state_error(node: Option<impl Into<String>>, error: impl Into<String>) -> Self {
        Self::StateError {
            node: node.map(|n| n.into()),
            error: error.into(),
        }
    }

    /// Build a [`GraphError::Blocked`] for a node whose dependency failed.
    pub fn blocked(node: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::Blocked {
            node: node.into(),
            dependency: dependency.into(),
        }
    }
}
