//! HTTP routes: plan submission and the per-plan SSE event stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use tooling::bus::{LocalBus, MessageBus};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::validate_not_empty;
use crate::api::response::{created, SuccessResponse};
use crate::config::OrchestratorConfig;
use crate::events::{PlanEventLog, SubscriberQuotas};

/// Materializes and starts a plan for a submitted goal. The concrete
/// implementation (`langgraph-prebuilt::plan::PlanFactory`) is injected so
/// this crate stays decoupled from plan construction.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn submit(&self, request: SubmitPlanRequest) -> ApiResult<PlanSubmission>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPlanRequest {
    pub goal: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSubmission {
    pub plan_id: String,
    pub trace_id: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<PlanEventLog>,
    pub quotas: Arc<SubscriberQuotas>,
    pub runner: Arc<dyn PlanRunner>,
    /// Agent-to-agent message bus. Node handlers inside the injected
    /// `PlanRunner` register themselves here to receive dispatches from
    /// other nodes in the same plan run (spec §4.4); the HTTP layer itself
    /// never publishes to it.
    pub bus: Arc<dyn MessageBus>,
}

impl AppState {
    pub fn new(config: &OrchestratorConfig, runner: Arc<dyn PlanRunner>) -> Self {
        Self {
            events: Arc::new(PlanEventLog::new(config.events.history_capacity)),
            quotas: SubscriberQuotas::new(
                config.events.max_subscribers_per_ip,
                config.events.max_subscribers_per_subject,
            ),
            runner,
            bus: Arc::new(LocalBus::new()),
        }
    }
}

/// Build the complete API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plans", post(submit_plan))
        .route("/plan/:plan_id/events", get(plan_events))
        .with_state(state)
}

async fn health() -> impl axum::response::IntoResponse {
    created(SuccessResponse::new(serde_json::json!({"status": "ok"})))
}

async fn submit_plan(
    State(state): State<AppState>,
    Json(request): Json<SubmitPlanRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_not_empty(&request.goal, "goal")?;
    let submission = state.runner.submit(request).await?;
    Ok(created(submission))
}

async fn plan_events(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subject = headers
        .get("x-subject-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let guard = state
        .quotas
        .acquire(addr.ip(), subject)
        .map_err(|_| ApiError::TooManyRequests)?;

    let (history, rx) = state.events.subscribe(&plan_id);

    let history_stream = stream::iter(
        history
            .into_iter()
            .map(|event| Ok(to_sse_event(&event))),
    );
    let live_stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Ok(to_sse_event(&event))),
            Err(_lagged) => None,
        }
    });

    let combined = history_stream.chain(live_stream).map(move |item| {
        let _keep_alive_guard = &guard;
        item
    });

    Ok(Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_millis(15_000))
            .text("keep-alive"),
    ))
}

fn to_sse_event(event: &crate::events::PlanEvent) -> Event {
    Event::default()
        .event("plan.step")
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("plan.step").data("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PlanEvent, StepSnapshot, StepState};

    struct EchoRunner;

    #[async_trait]
    impl PlanRunner for EchoRunner {
        async fn submit(&self, request: SubmitPlanRequest) -> ApiResult<PlanSubmission> {
            Ok(PlanSubmission {
                plan_id: request.plan_id.unwrap_or_else(|| "generated".to_string()),
                trace_id: "trace-1".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn submit_plan_rejects_empty_goal() {
        let runner: Arc<dyn PlanRunner> = Arc::new(EchoRunner);
        let state = AppState::new(&OrchestratorConfig::default(), runner);

        let result = submit_plan(
            State(state),
            Json(SubmitPlanRequest {
                goal: "   ".to_string(),
                plan_id: None,
                variables: Default::default(),
            }),
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn to_sse_event_carries_the_plan_step_name() {
        let event = PlanEvent {
            plan_id: "p1".to_string(),
            trace_id: "t1".to_string(),
            request_id: None,
            occurred_at: chrono::Utc::now(),
            step: StepSnapshot {
                id: "s1".to_string(),
                action: "noop".to_string(),
                tool: None,
                state: StepState::Queued,
                capability: None,
                labels: vec![],
                timeout_ms: None,
                approval_required: false,
                attempt: 1,
                summary: None,
                output: None,
                approvals: vec![],
            },
        };

        let sse_event = to_sse_event(&event);
        assert!(format!("{:?}", sse_event).contains("plan.step"));
    }

    struct UppercaseHandler;

    #[async_trait]
    impl tooling::bus::MessageHandler for UppercaseHandler {
        async fn handle(
            &self,
            message: &tooling::bus::Message,
        ) -> std::result::Result<serde_json::Value, String> {
            let text = message
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing text".to_string())?;
            Ok(serde_json::json!({"text": text.to_uppercase()}))
        }
    }

    #[tokio::test]
    async fn app_state_bus_dispatches_requests_between_registered_agents() {
        let runner: Arc<dyn PlanRunner> = Arc::new(EchoRunner);
        let state = AppState::new(&OrchestratorConfig::default(), runner);

        state
            .bus
            .register_handler(
                "shouter",
                tooling::bus::MessageType::Request,
                Arc::new(UppercaseHandler),
            )
            .await;

        let reply = state
            .bus
            .request(
                "node-a",
                "shouter",
                serde_json::json!({"text": "hello"}),
                std::time::Duration::from_millis(500),
            )
            .await
            .unwrap();

        assert_eq!(reply["text"], "HELLO");
    }
}
