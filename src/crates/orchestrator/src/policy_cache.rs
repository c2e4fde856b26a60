//! Two-tier policy decision cache with cross-replica invalidation.
//!
//! L1 is an in-process LRU+TTL cache (`langgraph_core::cache::Cache`, reused
//! as-is). L2 is an optional shared store behind the `PolicyStore` trait,
//! grounded on `langgraph_core::store::Cache`'s get/put-with-ttl/delete
//! contract — a closer match than the checkpoint traits, since both are
//! plain async key/value stores with TTL semantics. `set` publishes an
//! invalidation message that every other replica applies to its own L1;
//! messages originating from this replica are ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use langgraph_core::cache::{Cache as LocalCache, CacheConfig};

/// L2 backend contract. Intentionally black-box: a real deployment might back
/// this with Redis, a shared database, or nothing at all (L1-only fallback).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PolicyCacheError>;
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), PolicyCacheError>;
}

#[derive(Debug, Error)]
pub enum PolicyCacheError {
    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Invalidation message published on `set`, broadcast to every replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub key: String,
    pub source_instance_id: String,
}

/// Two-tier cache: L1 always present, L2 optional.
pub struct PolicyDecisionCache {
    instance_id: String,
    l1: LocalCache<String, Value>,
    l2: Option<Arc<dyn PolicyStore>>,
    l1_ttl: Duration,
    invalidations: broadcast::Sender<InvalidationMessage>,
}

impl PolicyDecisionCache {
    pub fn new(instance_id: impl Into<String>, capacity: usize, l1_ttl: Duration) -> Self {
        Self::with_store(instance_id, capacity, l1_ttl, None)
    }

    pub fn with_store(
        instance_id: impl Into<String>,
        capacity: usize,
        l1_ttl: Duration,
        l2: Option<Arc<dyn PolicyStore>>,
    ) -> Self {
        let config = CacheConfig {
            max_size: capacity,
            default_ttl: Some(l1_ttl),
            ..CacheConfig::default()
        };
        let (tx, _rx) = broadcast::channel(256);
        Self {
            instance_id: instance_id.into(),
            l1: LocalCache::new(config),
            l2,
            l1_ttl,
            invalidations: tx,
        }
    }

    /// Subscribe to invalidation messages, to be relayed across replicas by
    /// whatever transport the deployment uses (the message bus's broadcast
    /// primitive in a distributed setup).
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.invalidations.subscribe()
    }

    /// Apply an invalidation received from another replica. Self-originated
    /// messages are ignored.
    pub async fn apply_invalidation(&self, msg: &InvalidationMessage) {
        if msg.source_instance_id == self.instance_id {
            return;
        }
        self.l1.remove(&msg.key).await;
    }

    /// Fetch a decision: L1 first, then L2 (populating L1 on hit).
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.l1.get(&key.to_string()).await {
            return Some(value);
        }

        let l2 = self.l2.as_ref()?;
        match l2.get(key).await {
            Ok(Some(value)) => {
                self.l1
                    .put_with_ttl(key.to_string(), value.clone(), Some(self.l1_ttl))
                    .await;
                Some(value)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, key, "policy store unavailable, L1-only fallback");
                None
            }
        }
    }

    /// Write a decision to L1 and L2, then announce the invalidation.
    pub async fn set(&self, key: &str, value: Value) {
        self.l1
            .put_with_ttl(key.to_string(), value.clone(), Some(self.l1_ttl))
            .await;

        if let Some(l2) = &self.l2 {
            if let Err(err) = l2.put(key, value, Some(self.l1_ttl)).await {
                tracing::warn!(error = %err, key, "policy store write failed, L1-only fallback");
            }
        }

        let _ = self.invalidations.send(InvalidationMessage {
            key: key.to_string(),
            source_instance_id: self.instance_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemoryPolicyStore {
        data: Mutex<std::collections::HashMap<String, Value>>,
    }

    impl InMemoryPolicyStore {
        fn new() -> Self {
            Self {
                data: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl PolicyStore for InMemoryPolicyStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, PolicyCacheError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<(), PolicyCacheError> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn get_falls_back_to_l2_and_populates_l1() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .put("k", serde_json::json!({"allow": true}), None)
            .await
            .unwrap();

        let cache = PolicyDecisionCache::with_store("inst-a", 100, Duration::from_secs(60), Some(store));
        let value = cache.get("k").await;
        assert_eq!(value, Some(serde_json::json!({"allow": true})));
    }

    #[tokio::test]
    async fn set_ignores_self_originated_invalidation() {
        let cache = PolicyDecisionCache::new("inst-a", 100, Duration::from_secs(60));
        cache.set("k", serde_json::json!(1)).await;

        let mut rx = cache.subscribe_invalidations();
        cache.set("k", serde_json::json!(2)).await;
        let msg = rx.recv().await.unwrap();

        cache.apply_invalidation(&msg).await;
        assert_eq!(cache.get("k").await, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn other_replica_invalidation_evicts_local_l1() {
        let cache = PolicyDecisionCache::new("inst-a", 100, Duration::from_secs(60));
        cache.set("k", serde_json::json!(1)).await;

        let msg = InvalidationMessage {
            key: "k".to_string(),
            source_instance_id: "inst-b".to_string(),
        };
        cache.apply_invalidation(&msg).await;

        assert_eq!(cache.get("k").await, None);
    }
}
