//! Core execution primitives for the orchestrator control plane.
//!
//! This crate is deliberately small: it owns the pieces that are reused by
//! every other crate in the workspace regardless of which subsystem is
//! calling into them.
//!
//! # Module organization
//!
//! - [`exec_graph`] — the `ExecutionGraph` DAG engine: construction
//!   validation, handler dispatch, retry-with-backoff, and the
//!   Ready/Blocked/Completed/Failed state machine that `langgraph-prebuilt`
//!   materializes plans into.
//! - [`cache`] — a generic in-process LRU/LFU/FIFO/TTL cache used as the L1
//!   tier of the policy decision cache and for memoizing node/tool output.
//! - [`store`] — `Store` and `Cache` traits for pluggable key-value
//!   backends; `orchestrator`'s L2 policy store and agent-scoped persistence
//!   both implement `Store` against this trait rather than a concrete
//!   database type.
//! - [`retry`] — exponential backoff with jitter, used outside the
//!   execution graph (provider calls, bus requests) where randomized
//!   spacing rather than the deterministic per-node policy in
//!   [`exec_graph::NodeRetryPolicy`] is appropriate.
//! - [`messages`] — conversational message types (`Message`, `MessageRole`,
//!   history trimming/merging) shared by every crate that talks to an LLM
//!   provider.
//! - [`llm`] — the `ChatModel` trait and request/response types every
//!   concrete provider implements; `llm::router::ProviderRouter` dispatches
//!   through `Arc<dyn ChatModel>` instances obtained here.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ langgraph-prebuilt::plan::PlanFactory                       │
//! │  materializes ExecutionGraphDefinition from a PlanDefinition │
//! └───────────────────────────┬────────────────────────────────┘
//!                             ↓
//! ┌────────────────────────────────────────────────────────────┐
//! │ langgraph_core::exec_graph::ExecutionGraph                  │
//! │  Pending → Ready → Running → {Completed,Failed,Blocked,...} │
//! └───────────────────────────┬────────────────────────────────┘
//!                             ↓
//! ┌────────────────────────────────────────────────────────────┐
//! │ NodeHandler impls (tool calls, LLM calls via llm::ChatModel) │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod exec_graph;
pub mod llm;
pub mod messages;
pub mod retry;
pub mod store;

pub use error::{GraphError, Result};
pub use exec_graph::{
    ExecutionContext, ExecutionEvent, ExecutionGraph, ExecutionGraphDefinition, ExecutionOutcome,
    NodeExecution, NodeHandler, NodeId, NodeRetryPolicy, NodeSpec, NodeStatus, NodeType,
};
pub use cache::{
    Cache as PerformanceCache, CacheConfig, CacheEntry, CacheMetrics, EvictionPolicy,
    NodeCache, ToolCache, CheckpointCache, create_node_cache, create_tool_cache, create_checkpoint_cache,
};
pub use retry::{RetryPolicy, RetryState};
pub use store::{Store, InMemoryStore, Cache as KeyValueCache, InMemoryCache, StoreError};
pub use messages::{
    Message, MessageRole, MessageContent, ContentPart, RemoveMessage, MessageLike,
    add_messages, add_message_likes, convert_to_messages, filter_by_role, get_last_message,
    get_messages_by_id, merge_consecutive_messages, truncate_messages,
    trim_messages, TrimOptions, TrimStrategy,
};
