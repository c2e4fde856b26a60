//! Orchestrator server binary: plan submission HTTP API and SSE event stream.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator::api::routes::{AppState, PlanRunner, PlanSubmission, SubmitPlanRequest};
use orchestrator::api::{create_router, ApiError, ApiResult};
use orchestrator::config::OrchestratorConfig;

/// Placeholder runner until `langgraph-prebuilt::plan::PlanFactory` is wired
/// in as the real implementation of this trait.
struct UnwiredPlanRunner;

#[async_trait]
impl PlanRunner for UnwiredPlanRunner {
    async fn submit(&self, _request: SubmitPlanRequest) -> ApiResult<PlanSubmission> {
        Err(ApiError::InternalError(
            "plan factory is not wired into this deployment".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = std::env::var("ORCHESTRATOR_CONFIG")
        .ok()
        .and_then(|path| OrchestratorConfig::from_file(&path).ok())
        .unwrap_or_else(OrchestratorConfig::from_env);

    tracing::info!(bind_addr = %config.bind_addr, "starting orchestrator server");

    let state = AppState::new(&config, Arc::new(UnwiredPlanRunner));
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("orchestrator server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received CTRL-C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
