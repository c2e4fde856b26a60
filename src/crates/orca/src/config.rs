//! Configuration for the orca CLI client.
//!
//! Orca has exactly one thing to configure: where the orchestrator lives.
//! Resolution order, lowest to highest priority: built-in default,
//! `~/.orca/config.toml`, then the `ORCA_SERVER_URL` environment variable.
//! The `--server` flag (handled in the binary) takes precedence over all of
//! these.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{OrcaError, Result};

/// Client-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrcaConfig {
    /// Base URL of the orchestrator's HTTP API, e.g. "http://127.0.0.1:8080".
    pub server_url: String,
    /// Request timeout for plan submission (the SSE tail has no timeout).
    pub request_timeout_secs: u64,
}

impl Default for OrcaConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl OrcaConfig {
    /// Load configuration, falling back to defaults for anything the config
    /// file omits or doesn't exist, then apply the `ORCA_SERVER_URL` override.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("ORCA_SERVER_URL") {
            config.server_url = url;
        }

        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| OrcaError::Config(e.to_string()))
    }

    fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| OrcaError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".orca").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_localhost() {
        let config = OrcaConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn env_override_parses_from_toml_fragment() {
        let toml_src = "server_url = \"http://orchestrator.internal:9000\"\n";
        let parsed: OrcaConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(parsed.server_url, "http://orchestrator.internal:9000");
        assert_eq!(parsed.request_timeout_secs, 30);
    }
}
