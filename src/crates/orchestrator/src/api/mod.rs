//! HTTP surface for the orchestrator: plan submission and SSE event streaming.

pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use middleware::cors_layer;
pub use response::SuccessResponse;
pub use routes::{create_router, AppState};
