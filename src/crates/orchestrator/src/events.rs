//! Plan event log and server-sent-events fan-out.
//!
//! Every step transition in a running plan is published here. Each plan gets
//! a bounded in-memory ring buffer for history replay and a broadcast channel
//! for live fan-out; SSE subscribers see the history window followed by
//! everything published while they're connected, with no gap and no
//! duplication (see `integration_tests.rs` for the property test).

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle state of a plan step, mirrored on every published event.
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

/// Snapshot of one plan step at the moment an event was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

/// A single plan lifecycle event, as published to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEvent {
    pub plan_id: String,
    pub trace_id: String,
    pub request_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub step: StepSnapshot,
}

impl PlanEvent {
    /// True if `self` is a no-op republish of `previous`: same plan, same
    /// step, and the same state/summary/output/timestamp.
    fn is_duplicate_of(&self, previous: &PlanEvent) -> bool {
        self.plan_id == previous.plan_id
            && self.step.id == previous.step.id
            && self.step.state == previous.step.state
            && self.step.summary == previous.step.summary
            && self.step.output == previous.step.output
            && self.occurred_at == previous.occurred_at
    }
}

struct PlanLog {
    history: VecDeque<PlanEvent>,
    tx: broadcast::Sender<PlanEvent>,
}

/// Per-plan bounded event history with live SSE fan-out.
pub struct PlanEventLog {
    capacity: usize,
    plans: DashMap<String, Mutex<PlanLog>>,
}

impl PlanEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            plans: DashMap::new(),
        }
    }

    /// Append `event` to its plan's history and fan it out to current
    /// subscribers. A republish that matches the last event for the same
    /// step is silently dropped (idempotence, spec §4.7).
    pub fn publish(&self, event: PlanEvent) {
        let entry = self
            .plans
            .entry(event.plan_id.clone())
            .or_insert_with(|| Mutex::new(PlanLog {
                history: VecDeque::new(),
                tx: broadcast::channel(self.capacity.max(16)).0,
            }));
        let mut log = entry.lock();

        if let Some(last) = log
            .history
            .iter()
            .rev()
            .find(|e| e.step.id == event.step.id)
        {
            if event.is_duplicate_of(last) {
                return;
            }
        }

        if log.history.len() >= self.capacity {
            log.history.pop_front();
        }
        log.history.push_back(event.clone());
        let _ = log.tx.send(event);
    }

    /// Current history window for a plan (empty if the plan has no events).
    pub fn history(&self, plan_id: &str) -> Vec<PlanEvent> {
        match self.plans.get(plan_id) {
            Some(entry) => entry.lock().history.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Atomically snapshot history and subscribe to live events, so nothing
    /// published between the snapshot and the subscription is missed or
    /// duplicated.
    pub fn subscribe(&self, plan_id: &str) -> (Vec<PlanEvent>, broadcast::Receiver<PlanEvent>) {
        let entry = self
            .plans
            .entry(plan_id.to_string())
            .or_insert_with(|| Mutex::new(PlanLog {
                history: VecDeque::new(),
                tx: broadcast::channel(self.capacity.max(16)).0,
            }));
        let log = entry.lock();
        let history = log.history.iter().cloned().collect();
        let rx = log.tx.subscribe();
        (history, rx)
    }
}

impl Default for PlanEventLog {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Per-IP / per-subject concurrent-subscriber quota enforcement (spec §4.7).
#[derive(Debug)]
pub struct SubscriberQuotas {
    max_per_ip: usize,
    max_per_subject: usize,
    per_ip: DashMap<IpAddr, usize>,
    per_subject: DashMap<String, usize>,
}

/// Quota exceeded; maps to an HTTP 429 at the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded;

impl SubscriberQuotas {
    pub fn new(max_per_ip: usize, max_per_subject: usize) -> Arc<Self> {
        Arc::new(Self {
            max_per_ip,
            max_per_subject,
            per_ip: DashMap::new(),
            per_subject: DashMap::new(),
        })
    }

    /// Reserve a subscriber slot for `ip` and, if present, `subject`. Returns
    /// a guard that releases the slot(s) on drop (disconnect).
    pub fn acquire(
        self: &Arc<Self>,
        ip: IpAddr,
        subject: Option<String>,
    ) -> Result<QuotaGuard, QuotaExceeded> {
        {
            let mut count = self.per_ip.entry(ip).or_insert(0);
            if *count >= self.max_per_ip {
                return Err(QuotaExceeded);
            }
            *count += 1;
        }

        if let Some(subject) = &subject {
            let mut count = self.per_subject.entry(subject.clone()).or_insert(0);
            if *count >= self.max_per_subject {
                if let Some(mut ip_count) = self.per_ip.get_mut(&ip) {
                    *ip_count = ip_count.saturating_sub(1);
                }
                return Err(QuotaExceeded);
            }
            *count += 1;
        }

        Ok(QuotaGuard {
            quotas: self.clone(),
            ip,
            subject,
        })
    }
}

/// RAII guard releasing a subscriber slot when the SSE stream ends.
#[derive(Debug, PartialEq)]
pub struct QuotaGuard {
    quotas: Arc<SubscriberQuotas>,
    ip: IpAddr,
    subject: Option<String>,
}

impl Drop for QuotaGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.quotas.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
        if let Some(subject) = &self.subject {
            if let Some(mut count) = self.quotas.per_subject.get_mut(subject) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(plan_id: &str, step_id: &str, state: StepState, at_secs: i64) -> PlanEvent {
        PlanEvent {
            plan_id: plan_id.to_string(),
            trace_id: "trace-1".to_string(),
            request_id: None,
            occurred_at: DateTime::from_timestamp(at_secs, 0).unwrap(),
            step: StepSnapshot {
                id: step_id.to_string(),
                action: "noop".to_string(),
                tool: None,
                state,
                capability: None,
                labels: vec![],
                timeout_ms: None,
                approval_required: false,
                attempt: 1,
                summary: None,
                output: None,
                approvals: vec![],
            },
        }
    }

    #[test]
    fn publish_respects_capacity() {
        let log = PlanEventLog::new(2);
        log.publish(event("p1", "a", StepState::Queued, 1));
        log.publish(event("p1", "b", StepState::Queued, 2));
        log.publish(event("p1", "c", StepState::Queued, 3));

        let history = log.history("p1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].step.id, "b");
        assert_eq!(history[1].step.id, "c");
    }

    #[test]
    fn duplicate_republish_is_a_no_op() {
        let log = PlanEventLog::new(8);
        log.publish(event("p1", "a", StepState::Running, 1));
        log.publish(event("p1", "a", StepState::Running, 1));

        assert_eq!(log.history("p1").len(), 1);
    }

    #[tokio::test]
    async fn subscriber_sees_history_then_live_events_in_order() {
        let log = Arc::new(PlanEventLog::new(8));
        log.publish(event("p1", "a", StepState::Queued, 1));

        let (history, mut rx) = log.subscribe("p1");
        assert_eq!(history.len(), 1);

        log.publish(event("p1", "a", StepState::Running, 2));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.step.state, StepState::Running);
    }

    #[test]
    fn quota_rejects_beyond_the_configured_limit() {
        let quotas = SubscriberQuotas::new(1, 10);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let _first = quotas.acquire(ip, None).expect("first slot admitted");
        assert_eq!(quotas.acquire(ip, None), Err(QuotaExceeded));
    }

    #[test]
    fn quota_releases_on_guard_drop() {
        let quotas = SubscriberQuotas::new(1, 10);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        {
            let _guard = quotas.acquire(ip, None).unwrap();
        }

        assert!(quotas.acquire(ip, None).is_ok());
    }
}
