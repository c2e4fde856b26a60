//! Wire types for the orchestrator's plan-submission and event-stream API.
//!
//! These mirror `orchestrator::events::PlanEvent` and the
//! `SubmitPlanRequest`/`PlanSubmission` pair from `orchestrator::api::routes`
//! field for field. Orca talks to the orchestrator over plain HTTP rather
//! than linking its service crate, so the shapes live here, independently,
//! at the wire boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A goal to hand to the orchestrator, with optional plan id reuse and
/// template variables for plan construction.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitPlanRequest {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

impl SubmitPlanRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            plan_id: None,
            variables: serde_json::Map::new(),
        }
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn with_variables(mut self, variables: serde_json::Map<String, serde_json::Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// What the orchestrator hands back once a plan has been materialized.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSubmission {
    pub plan_id: String,
    pub trace_id: String,
}

/// Lifecycle state of a plan step, as published on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Queued,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    DeadLettered,
    Rejected,
}

impl StepState {
    /// True once a step has reached a state it will not leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::DeadLettered | Self::Rejected
        )
    }
}

/// Snapshot of one plan step at the moment an event was published.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    pub action: String,
    pub tool: Option<String>,
    pub state: StepState,
    pub capability: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub attempt: u32,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub approvals: Vec<String>,
}

/// A single plan lifecycle event, as decoded off the SSE stream.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanEvent {
    pub plan_id: String,
    pub trace_id: String,
    pub request_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub step: StepSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_cover_every_way_a_step_can_stop() {
        assert!(StepState::Completed.is_terminal());
        assert!(StepState::Failed.is_terminal());
        assert!(StepState::DeadLettered.is_terminal());
        assert!(StepState::Rejected.is_terminal());
        assert!(!StepState::Running.is_terminal());
        assert!(!StepState::WaitingApproval.is_terminal());
    }

    #[test]
    fn submit_plan_request_omits_empty_variables_from_the_wire() {
        let request = SubmitPlanRequest::new("ship the release");
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("variables").is_none());
        assert!(json.get("plan_id").is_none());
    }

    #[test]
    fn plan_event_round_trips_through_json() {
        let raw = serde_json::json!({
            "plan_id": "p1",
            "trace_id": "t1",
            "request_id": null,
            "occurred_at": "2026-01-01T00:00:00Z",
            "step": {
                "id": "s1",
                "action": "fetch",
                "tool": null,
                "state": "running",
                "capability": null,
                "labels": [],
                "timeout_ms": null,
                "approval_required": false,
                "attempt": 1,
                "summary": null,
                "output": null,
                "approvals": []
            }
        });
        let event: PlanEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.step.state, StepState::Running);
    }
}
