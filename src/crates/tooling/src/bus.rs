//! Agent-to-agent message bus.
//!
//! [`LocalBus`] dispatches messages to handlers registered in the same
//! process. [`DistributedBus`] adds a pub/sub [`MessageTransport`] so
//! agents hosted on different replicas can reach each other, while
//! delegating same-process dispatch to an inner `LocalBus`. Both implement
//! the shared [`MessageBus`] trait so callers don't need to care which one
//! they were handed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Errors surfaced by [`MessageBus`] operations.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("agent not registered: {0}")]
    UnknownAgent(String),

    #[error("request timed out")]
    RequestTimeout,

    #[error("message bus is shutting down")]
    BusShuttingDown,

    #[error("no handler registered for message type on agent '{0}'")]
    NoHandler(String),

    /// A handler-thrown error, sanitized via [`sanitize_handler_error`]
    /// before crossing the bus boundary.
    #[error("{0}")]
    ProcessingFailed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Allowlisted substrings that may be passed back to a requester verbatim;
/// anything else collapses to a generic message so handler internals never
/// leak across the bus.
const SAFE_ERROR_MARKERS: [&str; 4] = ["timeout", "no handler", "unknown agent", "shutting down"];

fn sanitize_handler_error(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if SAFE_ERROR_MARKERS.iter().any(|marker| lower.contains(marker)) {
        raw.to_string()
    } else {
        "Request processing failed".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Error,
    Broadcast,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Who a message is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Agent(String),
    Agents(Vec<String>),
    Broadcast,
}

/// A fully-formed message as it travels through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub sender: String,
    pub recipient: Recipient,
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// The bus instance that originated this message; carried so a
    /// `Response`/`Error` can be routed back to `response:{sourceInstance}`.
    #[serde(default)]
    pub source_instance: String,
}

impl Message {
    fn is_expired(&self) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(self.timestamp);
                age.num_milliseconds() > ttl as i64
            }
            None => false,
        }
    }
}

/// What a caller supplies to [`MessageBus::send`]; the bus fills in `id`,
/// `timestamp`, and `source_instance`.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub sender: String,
    pub recipient: Recipient,
    pub message_type: MessageType,
    pub payload: Value,
    pub priority: Priority,
    pub correlation_id: Option<String>,
    pub ttl_ms: Option<u64>,
}

impl OutboundMessage {
    pub fn new(sender: impl Into<String>, recipient: Recipient, payload: Value) -> Self {
        Self {
            sender: sender.into(),
            recipient,
            message_type: MessageType::Notify,
            payload,
            priority: Priority::Normal,
            correlation_id: None,
            ttl_ms: None,
        }
    }
}

/// Installed per `(agent, message type)`; invoked with the inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> std::result::Result<Value, String>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BusMetrics {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub expired: u64,
    /// Per-agent queue depth. `LocalBus` and `DistributedBus` both dispatch
    /// inline rather than buffering, so this is always empty; it exists so
    /// a future buffered transport can populate it without an interface
    /// change.
    pub queue_sizes: HashMap<String, usize>,
}

/// Shared contract between [`LocalBus`] and [`DistributedBus`].
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Idempotent: registering an already-known agent is a no-op.
    async fn register_agent(&self, agent_id: &str);

    async fn unregister_agent(&self, agent_id: &str);

    /// Installs a handler, auto-registering the agent if it wasn't already.
    async fn register_handler(
        &self,
        agent_id: &str,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    );

    async fn send(&self, message: OutboundMessage) -> Result<String, BusError>;

    /// Sends a `Request` and awaits the matching `Response`/`Error`,
    /// failing with [`BusError::RequestTimeout`] if none arrives in time.
    async fn request(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BusError>;

    async fn get_metrics(&self) -> BusMetrics;

    async fn get_registered_agents(&self) -> Vec<String>;

    /// Rejects all pending requests with `BusShuttingDown` and clears
    /// subscriptions/registrations.
    async fn shutdown(&self);
}

type Result<T, E = BusError> = std::result::Result<T, E>;

struct MetricsState {
    sent: u64,
    delivered: u64,
    failed: u64,
    expired: u64,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            sent: 0,
            delivered: 0,
            failed: 0,
            expired: 0,
        }
    }
}

/// Single-process message bus. Dispatch is synchronous: `send` calls
/// matching handlers inline before returning, so there is no internal
/// queue and per-agent queue sizes are always reported as zero.
pub struct LocalBus {
    instance_id: String,
    agents: DashMap<String, ()>,
    handlers: DashMap<(String, MessageType), Arc<dyn MessageHandler>>,
    pending_requests: DashMap<String, oneshot::Sender<Result<Value>>>,
    metrics: Mutex<MetricsState>,
    shutting_down: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            agents: DashMap::new(),
            handlers: DashMap::new(),
            pending_requests: DashMap::new(),
            metrics: Mutex::new(MetricsState::default()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn build_message(&self, outbound: OutboundMessage) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: outbound.message_type,
            sender: outbound.sender,
            recipient: outbound.recipient,
            payload: outbound.payload,
            priority: outbound.priority,
            correlation_id: outbound.correlation_id,
            timestamp: Utc::now(),
            ttl_ms: outbound.ttl_ms,
            source_instance: self.instance_id.clone(),
        }
    }

    /// Deliver `message` to the handler registered for
    /// `(agent_id, message.message_type)`, if any, and resolve a pending
    /// `request()` waiting on its correlation id.
    async fn dispatch_local(&self, agent_id: &str, message: &Message) {
        if message.is_expired() {
            self.metrics.lock().await.expired += 1;
            return;
        }

        let handler = self
            .handlers
            .get(&(agent_id.to_string(), message.message_type))
            .map(|entry| entry.value().clone());

        let outcome = match handler {
            Some(handler) => handler.handle(message).await.map_err(|e| {
                BusError::ProcessingFailed(sanitize_handler_error(&e))
            }),
            None => Err(BusError::NoHandler(agent_id.to_string())),
        };

        {
            let mut metrics = self.metrics.lock().await;
            match &outcome {
                Ok(_) => metrics.delivered += 1,
                Err(_) => metrics.failed += 1,
            }
        }

        if message.message_type == MessageType::Request {
            if let Some(correlation_id) = &message.correlation_id {
                if let Some((_, tx)) = self.pending_requests.remove(correlation_id) {
                    let _ = tx.send(outcome);
                }
            }
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn register_agent(&self, agent_id: &str) {
        self.agents.insert(agent_id.to_string(), ());
    }

    async fn unregister_agent(&self, agent_id: &str) {
        self.agents.remove(agent_id);
        self.handlers.retain(|(id, _), _| id != agent_id);
    }

    async fn register_handler(
        &self,
        agent_id: &str,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.register_agent(agent_id).await;
        self.handlers
            .insert((agent_id.to_string(), message_type), handler);
    }

    async fn send(&self, outbound: OutboundMessage) -> Result<String> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BusError::BusShuttingDown);
        }

        let message = self.build_message(outbound);
        self.metrics.lock().await.sent += 1;

        match &message.recipient {
            Recipient::Broadcast => {
                for entry in self.agents.iter() {
                    let agent_id = entry.key();
                    if agent_id != &message.sender {
                        self.dispatch_local(agent_id, &message).await;
                    }
                }
            }
            Recipient::Agents(ids) => {
                for id in ids {
                    self.dispatch_local(id, &message).await;
                }
            }
            Recipient::Agent(id) => {
                self.dispatch_local(id, &message).await;
            }
        }

        Ok(message.id)
    }

    async fn request(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BusError::BusShuttingDown);
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(correlation_id.clone(), tx);

        let outbound = OutboundMessage {
            sender: from.to_string(),
            recipient: Recipient::Agent(to.to_string()),
            message_type: MessageType::Request,
            payload,
            priority: Priority::Normal,
            correlation_id: Some(correlation_id.clone()),
            ttl_ms: Some(timeout.as_millis() as u64),
        };
        self.send(outbound).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Sender half was dropped without resolving (e.g. shutdown
                // raced the handler). Treat the same as a timeout.
                self.pending_requests.remove(&correlation_id);
                Err(BusError::RequestTimeout)
            }
            Err(_) => {
                self.pending_requests.remove(&correlation_id);
                self.metrics.lock().await.expired += 1;
                Err(BusError::RequestTimeout)
            }
        }
    }

    async fn get_metrics(&self) -> BusMetrics {
        let state = self.metrics.lock().await;
        BusMetrics {
            sent: state.sent,
            delivered: state.delivered,
            failed: state.failed,
            expired: state.expired,
            queue_sizes: self.agents.iter().map(|e| (e.key().clone(), 0)).collect(),
        }
    }

    async fn get_registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let correlation_ids: Vec<String> =
            self.pending_requests.iter().map(|e| e.key().clone()).collect();
        for correlation_id in correlation_ids {
            if let Some((_, tx)) = self.pending_requests.remove(&correlation_id) {
                let _ = tx.send(Err(BusError::BusShuttingDown));
            }
        }
        self.pending_requests.clear();
        self.agents.clear();
        self.handlers.clear();
    }
}

/// Pub/sub primitive a [`DistributedBus`] rides on. Channel names follow
/// `{prefix}:agent:{agentId}`, `{prefix}:broadcast`, `{prefix}:response:{instanceId}`,
/// and `{prefix}:agents:global` (the cluster-wide registry set).
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn publish(&self, channel: &str, message: Message) -> Result<(), BusError>;
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Message>, BusError>;
    async fn registry_add(&self, member: &str) -> Result<(), BusError>;
    async fn registry_remove(&self, member: &str) -> Result<(), BusError>;
    async fn registry_members(&self) -> Result<Vec<String>, BusError>;
}

/// Multi-replica message bus: same local dispatch semantics as
/// [`LocalBus`], fanned out over a [`MessageTransport`] so agents on other
/// replicas can be reached. `getRegisteredAgents` reads the cluster-wide
/// registry, falling back to the local view if the registry read fails.
pub struct DistributedBus {
    local: LocalBus,
    transport: Arc<dyn MessageTransport>,
    bus_prefix: String,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl DistributedBus {
    pub fn new(transport: Arc<dyn MessageTransport>, bus_prefix: impl Into<String>) -> Self {
        Self {
            local: LocalBus::new(),
            transport,
            bus_prefix: bus_prefix.into(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn agent_channel(&self, agent_id: &str) -> String {
        format!("{}:agent:{}", self.bus_prefix, agent_id)
    }

    fn broadcast_channel(&self) -> String {
        format!("{}:broadcast", self.bus_prefix)
    }

    fn response_channel(&self, instance_id: &str) -> String {
        format!("{}:response:{}", self.bus_prefix, instance_id)
    }

    /// Starts the background listeners every `DistributedBus` needs
    /// regardless of which agents it hosts: its own response channel (for
    /// replies to requests it originated) and the cluster broadcast
    /// channel. Call once after wrapping the bus in an `Arc`.
    pub async fn start(self: &Arc<Self>) {
        let response_channel = self.response_channel(&self.local.instance_id);
        let handle = Self::spawn_listener(self.clone(), response_channel, ListenerKind::Response);
        self.subscriptions.lock().await.push(handle);
        let broadcast_channel = self.broadcast_channel();
        let handle = Self::spawn_listener(self.clone(), broadcast_channel, ListenerKind::Broadcast);
        self.subscriptions.lock().await.push(handle);
    }

    /// Starts listening on `agent_id`'s channel so `send`/`request` calls
    /// made from other replicas reach its locally-registered handlers.
    pub async fn listen_for_agent(self: &Arc<Self>, agent_id: &str) {
        let channel = self.agent_channel(agent_id);
        let handle = Self::spawn_listener(self.clone(), channel, ListenerKind::Agent(agent_id.to_string()));
        self.subscriptions.lock().await.push(handle);
    }

    /// Subscribes to `channel` and processes every message that arrives
    /// for as long as the bus lives, per `kind`:
    /// - `Agent`: run the local handler, and if the message is a `Request`
    ///   publish the outcome back to the sender's response channel.
    /// - `Broadcast`: fan the message out to every locally registered
    ///   agent except its sender.
    /// - `Response`: resolve the pending local request matching the
    ///   message's correlation id.
    fn spawn_listener(self_: Arc<Self>, channel: String, kind: ListenerKind) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = match self_.transport.subscribe(&channel).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "failed to subscribe to transport channel");
                    return;
                }
            };
            while let Some(message) = rx.recv().await {
                match &kind {
                    ListenerKind::Agent(agent_id) => self_.dispatch_remote(agent_id, message).await,
                    ListenerKind::Broadcast => {
                        let ids = self_.local.get_registered_agents().await;
                        for id in ids {
                            if id != message.sender {
                                self_.local.dispatch_local(&id, &message).await;
                            }
                        }
                    }
                    ListenerKind::Response => self_.resolve_response(message).await,
                }
            }
        })
    }

    /// Runs `agent_id`'s handler for a message that arrived over the
    /// transport. `Request`s get their outcome published back to the
    /// sender's response channel instead of resolving a local oneshot,
    /// since the requester lives on a different replica.
    async fn dispatch_remote(&self, agent_id: &str, message: Message) {
        if message.message_type != MessageType::Request {
            self.local.dispatch_local(agent_id, &message).await;
            return;
        }

        let handler = self
            .local
            .handlers
            .get(&(agent_id.to_string(), MessageType::Request))
            .map(|entry| entry.value().clone());
        let outcome = match handler {
            Some(handler) => handler
                .handle(&message)
                .await
                .map_err(|e| sanitize_handler_error(&e)),
            None => Err(BusError::NoHandler(agent_id.to_string()).to_string()),
        };

        if let Some(correlation_id) = message.correlation_id.clone() {
            let response = self.local.build_message(OutboundMessage {
                sender: agent_id.to_string(),
                recipient: Recipient::Agent(message.sender.clone()),
                message_type: match &outcome {
                    Ok(_) => MessageType::Response,
                    Err(_) => MessageType::Error,
                },
                payload: match &outcome {
                    Ok(value) => value.clone(),
                    Err(err) => serde_json::json!({ "error": err }),
                },
                priority: Priority::Normal,
                correlation_id: Some(correlation_id),
                ttl_ms: None,
            });
            if let Err(e) = self
                .transport
                .publish(&self.response_channel(&message.source_instance), response)
                .await
            {
                tracing::warn!(error = %e, "failed to publish response over transport");
            }
        }
    }

    /// Resolves the pending local `request()` matching an incoming
    /// `Response`/`Error` message's correlation id.
    async fn resolve_response(&self, message: Message) {
        let Some(correlation_id) = message.correlation_id.clone() else {
            return;
        };
        let Some((_, tx)) = self.local.pending_requests.remove(&correlation_id) else {
            return;
        };
        let outcome = match message.message_type {
            MessageType::Error => {
                let reason = message
                    .payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Request processing failed")
                    .to_string();
                Err(BusError::ProcessingFailed(reason))
            }
            _ => Ok(message.payload),
        };
        let _ = tx.send(outcome);
    }
}

enum ListenerKind {
    Agent(String),
    Broadcast,
    Response,
}

#[async_trait]
impl MessageBus for DistributedBus {
    async fn register_agent(&self, agent_id: &str) {
        self.local.register_agent(agent_id).await;
        if let Err(e) = self.transport.registry_add(agent_id).await {
            tracing::warn!(agent_id, error = %e, "failed to add agent to cluster registry");
        }
    }

    async fn unregister_agent(&self, agent_id: &str) {
        self.local.unregister_agent(agent_id).await;
        if let Err(e) = self.transport.registry_remove(agent_id).await {
            tracing::warn!(agent_id, error = %e, "failed to remove agent from cluster registry");
        }
    }

    async fn register_handler(
        &self,
        agent_id: &str,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.local
            .register_handler(agent_id, message_type, handler)
            .await;
    }

    async fn send(&self, outbound: OutboundMessage) -> Result<String, BusError> {
        let message = self.local.build_message(outbound);
        self.local.metrics.lock().await.sent += 1;

        match &message.recipient {
            Recipient::Broadcast => {
                self.transport
                    .publish(&self.broadcast_channel(), message.clone())
                    .await?;
            }
            Recipient::Agents(ids) => {
                for id in ids {
                    self.transport
                        .publish(&self.agent_channel(id), message.clone())
                        .await?;
                }
            }
            Recipient::Agent(id) => {
                self.transport
                    .publish(&self.agent_channel(id), message.clone())
                    .await?;
            }
        }

        Ok(message.id)
    }

    async fn request(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.local
            .pending_requests
            .insert(correlation_id.clone(), tx);

        let outbound = OutboundMessage {
            sender: from.to_string(),
            recipient: Recipient::Agent(to.to_string()),
            message_type: MessageType::Request,
            payload,
            priority: Priority::Normal,
            correlation_id: Some(correlation_id.clone()),
            ttl_ms: Some(timeout.as_millis() as u64),
        };

        self.send(outbound).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => {
                self.local.pending_requests.remove(&correlation_id);
                self.local.metrics.lock().await.expired += 1;
                Err(BusError::RequestTimeout)
            }
        }
    }

    async fn get_metrics(&self) -> BusMetrics {
        self.local.get_metrics().await
    }

    async fn get_registered_agents(&self) -> Vec<String> {
        match self.transport.registry_members().await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(error = %e, "cluster registry read failed, falling back to local view");
                self.local.get_registered_agents().await
            }
        }
    }

    async fn shutdown(&self) {
        self.local.shutdown().await;
        for handle in self.subscriptions.lock().await.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(&self, message: &Message) -> std::result::Result<Value, String> {
            Ok(message.payload.clone())
        }
    }

    struct FailingHandler(&'static str);

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: &Message) -> std::result::Result<Value, String> {
            Err(self.0.to_string())
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: &Message) -> std::result::Result<Value, String> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn request_returns_handler_output() {
        let bus = LocalBus::new();
        bus.register_handler("echo", MessageType::Request, Arc::new(EchoHandler))
            .await;

        let result = bus
            .request("caller", "echo", serde_json::json!({"x": 1}), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn request_without_handler_times_out_immediately_with_no_handler_context() {
        let bus = LocalBus::new();
        bus.register_agent("silent").await;

        let result = bus
            .request("caller", "silent", Value::Null, Duration::from_millis(50))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sanitizes_handler_errors_outside_the_allowlist() {
        let bus = LocalBus::new();
        bus.register_handler(
            "leaky",
            MessageType::Request,
            Arc::new(FailingHandler("sql error: password=hunter2")),
        )
        .await;

        let err = bus
            .request("caller", "leaky", Value::Null, Duration::from_millis(200))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("hunter2"));
        assert_eq!(message, "Request processing failed");
    }

    #[tokio::test]
    async fn allowlisted_handler_errors_pass_through_verbatim() {
        let bus = LocalBus::new();
        bus.register_handler(
            "timeoutish",
            MessageType::Request,
            Arc::new(FailingHandler("upstream timeout waiting for tool")),
        )
        .await;

        let err = bus
            .request("caller", "timeoutish", Value::Null, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream timeout waiting for tool");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_agent_except_the_sender() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.register_handler(
            "a",
            MessageType::Broadcast,
            Arc::new(CountingHandler(count.clone())),
        )
        .await;
        bus.register_handler(
            "b",
            MessageType::Broadcast,
            Arc::new(CountingHandler(count.clone())),
        )
        .await;
        bus.register_agent("a").await;

        bus.send(OutboundMessage {
            sender: "a".to_string(),
            recipient: Recipient::Broadcast,
            message_type: MessageType::Broadcast,
            payload: Value::Null,
            priority: Priority::Normal,
            correlation_id: None,
            ttl_ms: None,
        })
        .await
        .unwrap();

        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_fails_all_pending_requests() {
        let bus = Arc::new(LocalBus::new());
        bus.register_agent("slow").await;

        let bus_clone = bus.clone();
        let request = tokio::spawn(async move {
            bus_clone
                .request("caller", "slow", Value::Null, Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.shutdown().await;

        let result = request.await.unwrap();
        assert!(matches!(result, Err(BusError::BusShuttingDown) | Err(BusError::RequestTimeout)));
    }

    #[tokio::test]
    async fn metrics_count_sent_delivered_and_failed() {
        let bus = LocalBus::new();
        bus.register_handler("echo", MessageType::Notify, Arc::new(EchoHandler))
            .await;
        bus.register_handler("broken", MessageType::Notify, Arc::new(FailingHandler("x")))
            .await;

        bus.send(OutboundMessage::new("caller", Recipient::Agent("echo".to_string()), Value::Null))
            .await
            .unwrap();
        bus.send(OutboundMessage::new("caller", Recipient::Agent("broken".to_string()), Value::Null))
            .await
            .unwrap();

        let metrics = bus.get_metrics().await;
        assert_eq!(metrics.sent, 2);
        assert_eq!(metrics.delivered, 1);
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn expired_messages_are_not_dispatched() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.register_handler(
            "ttl",
            MessageType::Notify,
            Arc::new(CountingHandler(count.clone())),
        )
        .await;

        let mut message = bus.build_message(OutboundMessage {
            sender: "caller".to_string(),
            recipient: Recipient::Agent("ttl".to_string()),
            message_type: MessageType::Notify,
            payload: Value::Null,
            priority: Priority::Normal,
            correlation_id: None,
            ttl_ms: Some(1),
        });
        message.timestamp = Utc::now() - chrono::Duration::milliseconds(100);

        bus.dispatch_local("ttl", &message).await;
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(bus.get_metrics().await.expired, 1);
    }
}
