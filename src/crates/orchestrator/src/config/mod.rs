//! Configuration for the orchestrator service
//!
//! Loads `orchestrator.yaml` (with `$include`/`${ENV:default}` support via
//! [`loader`]) into [`OrchestratorConfig`]: the HTTP bind address, SSE fan-out
//! quotas, the policy decision cache sizing, and the message bus channel
//! prefix.

pub mod loader;

pub use loader::{deep_merge, load_yaml_config, load_yaml_file};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::OrchestratorError;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Address the HTTP server binds to, e.g. "0.0.0.0:8080".
    pub bind_addr: String,
    /// Directories searched for plan definition files.
    pub plan_paths: Vec<String>,
    /// Server-sent-events fan-out quotas and buffering.
    pub events: EventsConfig,
    /// Policy decision cache sizing.
    pub policy_cache: PolicyCacheConfig,
    /// Message bus channel prefix (see `tooling::bus`).
    pub bus_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            plan_paths: vec!["./plans".to_string()],
            events: EventsConfig::default(),
            policy_cache: PolicyCacheConfig::default(),
            bus_prefix: "msgbus".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, OrchestratorError> {
        load_yaml_config(path)
    }

    /// Build configuration from defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("ORCHESTRATOR_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(prefix) = std::env::var("ORCHESTRATOR_BUS_PREFIX") {
            config.bus_prefix = prefix;
        }
        config
    }
}

/// SSE fan-out limits and keep-alive cadence (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum concurrent subscribers per source IP.
    pub max_subscribers_per_ip: usize,
    /// Maximum concurrent subscribers per authenticated subject.
    pub max_subscribers_per_subject: usize,
    /// Number of events retained per plan for history replay.
    pub history_capacity: usize,
    /// Interval between keep-alive comment frames, in milliseconds.
    pub keep_alive_interval_ms: u64,
    /// Bounded channel capacity per subscriber before backpressure applies.
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_ip: 16,
            max_subscribers_per_subject: 8,
            history_capacity: 256,
            keep_alive_interval_ms: 15_000,
            subscriber_buffer: 64,
        }
    }
}

/// Policy decision cache sizing (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyCacheConfig {
    /// Maximum number of entries held in the L1 in-process cache.
    pub l1_capacity: u64,
    /// Time-to-live for L1 entries, in milliseconds.
    pub l1_ttl_ms: u64,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            l1_ttl_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.bus_prefix, "msgbus");
        assert!(config.events.max_subscribers_per_ip > 0);
    }

    #[test]
    fn from_env_overrides_bind_addr() {
        std::env::set_var("ORCHESTRATOR_BIND_ADDR", "127.0.0.1:9090");
        let config = OrchestratorConfig::from_env();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        std::env::remove_var("ORCHESTRATOR_BIND_ADDR");
    }
}
