//! Error types for the orca CLI client.

use thiserror::Error;

/// Result type alias for orca operations.
pub type Result<T> = std::result::Result<T, OrcaError>;

/// Errors the CLI client can return.
#[derive(Debug, Error)]
pub enum OrcaError {
    /// The HTTP request to the orchestrator itself failed (DNS, connect, TLS, timeout, ...).
    #[error("request to orchestrator failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The orchestrator responded, but with a non-2xx status.
    #[error("orchestrator returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// A response or event payload didn't match the expected wire format.
    #[error("invalid payload from orchestrator: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The config file exists but couldn't be parsed, or no home directory could be found.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading the config file failed for a reason other than "not found".
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
