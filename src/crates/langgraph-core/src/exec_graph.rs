//! ExecutionGraph — a plain dependency-DAG execution engine.
//!
//! Unlike a superstep/channel graph, an [`ExecutionGraph`] runs each node
//! exactly once per invocation, gated purely by its declared dependencies.
//! Nodes become `Ready` as soon as their dependencies resolve, are dispatched
//! up to a configurable concurrency limit, and retried with backoff on
//! failure according to a per-node policy.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use langgraph_core::exec_graph::{
//!     ExecutionGraph, ExecutionGraphDefinition, NodeSpec, NodeType, NodeHandler,
//! };
//! use langgraph_core::error::Result;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct EchoHandler;
//!
//! #[async_trait]
//! impl NodeHandler for EchoHandler {
//!     async fn execute(&self, node: &NodeSpec, _ctx: &langgraph_core::exec_graph::ExecutionContext) -> Result<Value> {
//!         Ok(json!({ "node": node.id }))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let def = ExecutionGraphDefinition {
//!     graph_id: "g1".into(),
//!     nodes: vec![NodeSpec::new("a", NodeType::Task)],
//!     entry_nodes: vec![],
//! };
//! let graph = ExecutionGraph::new(def)?;
//! graph.register_handler(NodeType::Task, std::sync::Arc::new(EchoHandler)).await;
//! let outcome = graph.execute(None).await?;
//! assert!(outcome.success);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};

/// Identifies a node within a single [`ExecutionGraph`].
pub type NodeId = String;

/// The shape of work a node performs; each value is mapped to a registered
/// [`NodeHandler`] in the graph's handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    /// A single unit of work.
    Task,
    /// A branch point whose handler decides which successors run.
    Condition,
    /// A fan-out point; successors are dispatched independently.
    Parallel,
    /// A fan-in point; runs once all its dependencies complete.
    Merge,
    /// A node that may re-enter itself via application-level looping.
    Loop,
}

/// Per-node retry configuration.
///
/// `backoffMs * (exponential ? 2^(attempt-1) : 1)` gives the delay before the
/// `attempt`-th retry (1-indexed), matching the distilled policy shape rather
/// than [`crate::retry::RetryPolicy`]'s jittered-seconds variant — node
/// retries are deterministic so that test suites can assert exact timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRetryPolicy {
    /// Maximum number of retries after the first attempt (0–10).
    pub max_retries: u32,
    /// Base backoff in milliseconds (100–60000).
    pub backoff_ms: u64,
    /// Whether the backoff doubles with each retry.
    pub exponential: bool,
}

impl NodeRetryPolicy {
    /// Delay before the `attempt`-th retry (1-indexed: the delay before the
    /// first retry is `delay_for_attempt(1)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = if self.exponential {
            self.backoff_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20))
        } else {
            self.backoff_ms
        };
        Duration::from_millis(millis)
    }
}

/// Static definition of one node in an [`ExecutionGraphDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the graph.
    pub id: NodeId,
    /// What kind of handler this node requires.
    pub node_type: NodeType,
    /// Ids of nodes that must resolve before this one can run.
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    /// Handler-specific configuration, typically the materialized input
    /// template for this step.
    #[serde(default)]
    pub config: Value,
    /// Optional wall-clock deadline for a single handler invocation.
    #[serde(default, with = "duration_ms_option")]
    pub timeout: Option<Duration>,
    /// Optional retry policy applied on handler failure or timeout.
    #[serde(default)]
    pub retry_policy: Option<NodeRetryPolicy>,
    /// If true, a failure of this node does not block successors that
    /// declare it as a dependency.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl NodeSpec {
    /// Build a bare node with no dependencies, timeout, or retry policy.
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            dependencies: Vec::new(),
            config: Value::Null,
            timeout: None,
            retry_policy: None,
            continue_on_error: false,
        }
    }

    /// Set dependencies.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

mod duration_ms_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Construction-time shape of a graph: its nodes and, optionally, an
/// explicit entry-node set (inferred from dependency-free nodes if empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraphDefinition {
    /// Identifies this graph, primarily for logging and events.
    pub graph_id: String,
    /// All nodes in the graph.
    pub nodes: Vec<NodeSpec>,
    /// Explicit entry nodes; if empty, computed as nodes with no dependencies.
    #[serde(default)]
    pub entry_nodes: Vec<NodeId>,
}

/// The lifecycle a [`NodeExecution`] moves through. Transitions are strictly
/// ordered: `Pending -> Ready -> Running -> {Completed, Failed, Blocked,
/// Skipped}`. `Blocked` and `Skipped` can also be reached directly from
/// `Pending` without ever becoming `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies resolved; waiting for a dispatch slot.
    Ready,
    /// Handler currently executing (including retry backoff).
    Running,
    /// Handler returned successfully.
    Completed,
    /// Handler failed and retries (if any) were exhausted.
    Failed,
    /// Will never run: a non-continue-on-error dependency failed.
    Blocked,
    /// Not executed by design (reserved for conditional/loop handlers).
    Skipped,
}

/// Runtime record tracking one node's progress through a single graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Current lifecycle state.
    pub status: NodeStatus,
    /// Number of handler invocations made so far (0 before the first).
    pub attempt: u32,
    /// When the node first began running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the node reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Output value on success.
    pub output: Option<Value>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Number of retries performed (attempt - 1, once started).
    pub retry_count: u32,
}

impl Default for NodeExecution {
    fn default() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempt: 0,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// Per-run shared state: a mutable `variables` map and an `outputs` map
/// populated as nodes complete. Handlers receive a clone of this context;
/// all clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    variables: Arc<RwLock<HashMap<String, Value>>>,
    outputs: Arc<RwLock<HashMap<String, Value>>>,
}

impl ExecutionContext {
    /// Build a context pre-seeded with the given variables.
    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            variables: Arc::new(RwLock::new(variables)),
            outputs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read a variable.
    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.variables.read().await.get(name).cloned()
    }

    /// Write a variable, visible to every node that runs after this call.
    pub async fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.write().await.insert(name.into(), value);
    }

    /// Snapshot of the output recorded for a completed dependency.
    ///
    /// Callers are expected to only ask for ids the requesting node
    /// transitively depends on; the engine only ever populates the
    /// `dependencies` actually declared for a node before it dispatches
    /// that node's handler, so honest handlers naturally uphold this.
    pub async fn output_of(&self, node_id: &str) -> Option<Value> {
        self.outputs.read().await.get(node_id).cloned()
    }

    async fn record_output(&self, node_id: &str, value: Value) {
        self.outputs.write().await.insert(node_id.to_string(), value);
    }

    /// All outputs recorded so far, keyed by node id.
    pub async fn outputs_snapshot(&self) -> HashMap<String, Value> {
        self.outputs.read().await.clone()
    }
}

/// A handler executes the work associated with one [`NodeType`].
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Run this node's work and return its output.
    async fn execute(&self, node: &NodeSpec, context: &ExecutionContext) -> Result<Value>;
}

/// Events emitted during [`ExecutionGraph::execute`]. Ordered per-node;
/// unordered across nodes running concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    /// A run has begun.
    ExecutionStarted {
        /// Id of the graph being executed.
        graph_id: String,
    },
    /// A run has finished.
    ExecutionCompleted {
        /// Id of the graph being executed.
        graph_id: String,
        /// Whether the run succeeded overall.
        success: bool,
        /// Ids of nodes that reached `Completed`.
        completed: Vec<NodeId>,
        /// Ids of nodes that reached `Failed`.
        failed: Vec<NodeId>,
    },
    /// A node began (or resumed after retry backoff) running.
    NodeStarted {
        /// Node id.
        node_id: NodeId,
        /// 1-indexed attempt number.
        attempt: u32,
    },
    /// A node's handler returned successfully.
    NodeCompleted {
        /// Node id.
        node_id: NodeId,
        /// The value the handler returned.
        output: Value,
    },
    /// A node exhausted its retry budget (or had none) and failed.
    NodeFailed {
        /// Node id.
        node_id: NodeId,
        /// Error message.
        error: String,
    },
    /// A node failed but will be retried.
    NodeRetry {
        /// Node id.
        node_id: NodeId,
        /// The attempt number about to be made.
        attempt: u32,
        /// Backoff before the retry.
        delay_ms: u64,
    },
    /// A node will never run because a required dependency failed.
    NodeBlocked {
        /// Node id.
        node_id: NodeId,
        /// The dependency that caused the block.
        dependency: NodeId,
    },
}

/// Summary returned by [`ExecutionGraph::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether every `Failed` node had `continue_on_error` set.
    pub success: bool,
    /// Ids of nodes that reached `Completed`.
    pub completed: Vec<NodeId>,
    /// Ids of nodes that reached `Failed`.
    pub failed: Vec<NodeId>,
    /// Final outputs, keyed by node id.
    pub outputs: HashMap<String, Value>,
}

/// Three-color marker used for cycle detection during construction.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A validated, executable dependency graph.
///
/// Construction fails closed: duplicate ids, dangling dependencies, cycles,
/// and an empty entry set (after inference) are all rejected before any node
/// can run.
pub struct ExecutionGraph {
    graph_id: String,
    nodes: HashMap<NodeId, NodeSpec>,
    entry_nodes: Vec<NodeId>,
    successors: HashMap<NodeId, Vec<NodeId>>,
    handlers: RwLock<HashMap<NodeType, Arc<dyn NodeHandler>>>,
    concurrency_limit: usize,
    events: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionGraph {
    /// Validate a definition and build an executable graph.
    ///
    /// `concurrency_limit` of `0` is treated as unbounded (one permit per
    /// node).
    pub fn with_concurrency(definition: ExecutionGraphDefinition, concurrency_limit: usize) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for node in definition.nodes {
            let id = node.id.clone();
            if nodes.insert(id.clone(), node).is_some() {
                return Err(GraphError::Validation(format!("duplicate node id '{}'", id)));
            }
        }

        for node in nodes.values() {
            for dep in &node.dependencies {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::Validation(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.id, dep
                    )));
                }
            }
        }

        detect_cycle(&nodes)?;

        let entry_nodes = if definition.entry_nodes.is_empty() {
            let inferred: Vec<NodeId> = nodes
                .values()
                .filter(|n| n.dependencies.is_empty())
                .map(|n| n.id.clone())
                .collect();
            if inferred.is_empty() {
                return Err(GraphError::Validation(
                    "graph has no entry nodes and none could be inferred".to_string(),
                ));
            }
            inferred
        } else {
            definition.entry_nodes
        };

        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            nodes.keys().map(|id| (id.clone(), Vec::new())).collect();
        for node in nodes.values() {
            for dep in &node.dependencies {
                successors.get_mut(dep).unwrap().push(node.id.clone());
            }
        }

        let concurrency_limit = if concurrency_limit == 0 {
            nodes.len().max(1)
        } else {
            concurrency_limit
        };

        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            graph_id: definition.graph_id,
            nodes,
            entry_nodes,
            successors,
            handlers: RwLock::new(HashMap::new()),
            concurrency_limit,
            events: tx,
        })
    }

    /// Build an executable graph with unbounded concurrency.
    pub fn new(definition: ExecutionGraphDefinition) -> Result<Self> {
        Self::with_concurrency(definition, 0)
    }

    /// Install the handler used for every node of `node_type`.
    pub async fn register_handler(&self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.write().await.insert(node_type, handler);
    }

    /// Whether a handler is registered for `node_type`.
    pub async fn has_handler(&self, node_type: NodeType) -> bool {
        self.handlers.read().await.contains_key(&node_type)
    }

    /// Subscribe to execution events. Subscribers that fall behind lose the
    /// oldest unread events rather than stalling the dispatch loop.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ExecutionEvent) {
        // No subscribers is the common case in unit tests; ignore.
        let _ = self.events.send(event);
    }

    /// Run every node to completion, honoring dependencies, retries, and the
    /// configured concurrency limit.
    pub async fn execute(&self, initial_context: Option<ExecutionContext>) -> Result<ExecutionOutcome> {
        let context = initial_context.unwrap_or_default();
        let mut status: HashMap<NodeId, NodeExecution> =
            self.nodes.keys().map(|id| (id.clone(), NodeExecution::default())).collect();

        self.emit(ExecutionEvent::ExecutionStarted { graph_id: self.graph_id.clone() });
        info!(graph_id = %self.graph_id, "execution started");

        let mut ready: VecDeque<NodeId> = VecDeque::new();
        for id in &self.entry_nodes {
            status.get_mut(id).unwrap().status = NodeStatus::Ready;
            ready.push_back(id.clone());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let handlers = self.handlers.read().await.clone();
        let mut in_flight: JoinSet<(NodeId, std::result::Result<Value, String>)> = JoinSet::new();

        loop {
            while let Some(id) = ready.pop_front() {
                status.get_mut(&id).unwrap().status = NodeStatus::Running;
                let node = self.nodes.get(&id).unwrap().clone();
                let handler = handlers.get(&node.node_type).cloned();
                let context = context.clone();
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let events = self.events.clone();
                let graph_id = self.graph_id.clone();

                in_flight.spawn(async move {
                    let _permit = permit;
                    let result = run_node_with_retries(&node, &context, handler, &events, &graph_id).await;
                    (node.id.clone(), result)
                });
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(joined) = in_flight.join_next().await else { break };
            let (node_id, result) = joined.expect("node execution task panicked");

            let mut newly_finalized = Vec::new();
            {
                let entry = status.get_mut(&node_id).unwrap();
                entry.ended_at = Some(Utc::now());
                match result {
                    Ok(output) => {
                        entry.status = NodeStatus::Completed;
                        entry.output = Some(output.clone());
                        context.record_output(&node_id, output.clone()).await;
                        self.emit(ExecutionEvent::NodeCompleted { node_id: node_id.clone(), output });
                    }
                    Err(error) => {
                        entry.status = NodeStatus::Failed;
                        entry.error = Some(error.clone());
                        self.emit(ExecutionEvent::NodeFailed { node_id: node_id.clone(), error });
                    }
                }
            }
            newly_finalized.push(node_id);

            // Cascade readiness / blocking through the graph until no more
            // nodes change state this round.
            while let Some(id) = newly_finalized.pop() {
                for succ in self.successors.get(&id).cloned().unwrap_or_default() {
                    if status.get(&succ).unwrap().status != NodeStatus::Pending {
                        continue;
                    }
                    match self.evaluate(&succ, &status) {
                        Advance::Ready => {
                            status.get_mut(&succ).unwrap().status = NodeStatus::Ready;
                            ready.push_back(succ);
                        }
                        Advance::Blocked(dependency) => {
                            status.get_mut(&succ).unwrap().status = NodeStatus::Blocked;
                            self.emit(ExecutionEvent::NodeBlocked { node_id: succ.clone(), dependency });
                            newly_finalized.push(succ);
                        }
                        Advance::Wait => {}
                    }
                }
            }
        }

        let completed: Vec<NodeId> = status
            .iter()
            .filter(|(_, e)| e.status == NodeStatus::Completed)
            .map(|(id, _)| id.clone())
            .collect();
        let failed: Vec<NodeId> = status
            .iter()
            .filter(|(_, e)| e.status == NodeStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect();
        let success = failed.iter().all(|id| self.nodes[id].continue_on_error);

        self.emit(ExecutionEvent::ExecutionCompleted {
            graph_id: self.graph_id.clone(),
            success,
            completed: completed.clone(),
            failed: failed.clone(),
        });
        info!(graph_id = %self.graph_id, success, "execution completed");

        Ok(ExecutionOutcome { success, completed, failed, outputs: context.outputs_snapshot().await })
    }

    fn evaluate(&self, node_id: &NodeId, status: &HashMap<NodeId, NodeExecution>) -> Advance {
        let node = &self.nodes[node_id];
        let mut waiting = false;
        for dep in &node.dependencies {
            let dep_status = status[dep].status;
            match dep_status {
                NodeStatus::Completed => continue,
                NodeStatus::Failed | NodeStatus::Skipped if self.nodes[dep].continue_on_error => continue,
                NodeStatus::Pending | NodeStatus::Ready | NodeStatus::Running => {
                    waiting = true;
                }
                NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Blocked => {
                    return Advance::Blocked(dep.clone());
                }
            }
        }
        if waiting {
            Advance::Wait
        } else {
            Advance::Ready
        }
    }
}

enum Advance {
    Ready,
    Blocked(NodeId),
    Wait,
}

async fn run_node_with_retries(
    node: &NodeSpec,
    context: &ExecutionContext,
    handler: Option<Arc<dyn NodeHandler>>,
    events: &broadcast::Sender<ExecutionEvent>,
    graph_id: &str,
) -> std::result::Result<Value, String> {
    let Some(handler) = handler else {
        warn!(graph_id, node_id = %node.id, "no handler registered for node type");
        return Err(format!("no handler registered for node type {:?}", node.node_type));
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let _ = events.send(ExecutionEvent::NodeStarted { node_id: node.id.clone(), attempt });
        debug!(graph_id, node_id = %node.id, attempt, "node started");

        let call = handler.execute(node, context);
        let outcome = match node.timeout {
            Some(d) => match tokio_timeout(d, call).await {
                Ok(r) => r,
                Err(_) => Err(GraphError::Timeout {
                    operation: format!("node '{}'", node.id),
                    duration_ms: d.as_millis() as u64,
                }),
            },
            None => call.await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retry = node.retry_policy.as_ref().filter(|p| attempt <= p.max_retries);
                match retry {
                    Some(policy) => {
                        let delay = policy.delay_for_attempt(attempt);
                        let _ = events.send(ExecutionEvent::NodeRetry {
                            node_id: node.id.clone(),
                            attempt: attempt + 1,
                            delay_ms: delay.as_millis() as u64,
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => return Err(err.to_string()),
                }
            }
        }
    }
}

fn detect_cycle(nodes: &HashMap<NodeId, NodeSpec>) -> Result<()> {
    let mut marks: HashMap<&str, Mark> = nodes.keys().map(|id| (id.as_str(), Mark::White)).collect();

    fn visit<'a>(
        id: &'a str,
        nodes: &'a HashMap<NodeId, NodeSpec>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Black) => return Ok(()),
            Some(Mark::Gray) => {
                return Err(GraphError::Validation(format!("cycle detected at node '{}'", id)));
            }
            _ => {}
        }
        marks.insert(id, Mark::Gray);
        for dep in &nodes[id].dependencies {
            visit(dep.as_str(), nodes, marks)?;
        }
        marks.insert(id, Mark::Black);
        Ok(())
    }

    for id in nodes.keys() {
        visit(id, nodes, &mut marks)?;
    }
    Ok(())
}
