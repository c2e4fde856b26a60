//! Ordered provider selection with capability-aware request shaping and
//! shared rate limiting / circuit breaking.
//!
//! [`ProviderRouter`] holds a named set of [`ChatModel`] providers plus
//! their [`ProviderCapabilities`], and resolves a [`RouteRequest`] to an
//! ordered candidate list before walking it with the shared
//! [`RateLimiter`]/[`CircuitBreaker`] pair.

use std::collections::HashMap;
use std::sync::Arc;

use langgraph_core::llm::{ChatModel, ChatRequest, ChatResponse};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{LlmError, Result};
use crate::resilience::{CircuitBreaker, RateLimiter};

/// What a provider supports, consulted when shaping the outgoing request.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub supports_temperature: bool,
    pub default_temperature: Option<f32>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_temperature: true,
            default_temperature: None,
        }
    }
}

/// A routing mode names an ordered provider priority list; unlisted
/// enabled providers are appended afterward in their configured order.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub modes: HashMap<String, Vec<String>>,
}

/// A single routed chat request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub chat: ChatRequest,
    /// Caller-requested provider, if any (case-insensitive).
    pub provider: Option<String>,
    /// Named routing mode (`low_cost`, `balanced`, `high_quality`, ...).
    pub routing_mode: Option<String>,
}

/// One provider's failed attempt, surfaced in [`RouteError::AllProvidersFailed`].
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
}

/// The result of a successful route: the response plus any warnings
/// accumulated while shaping the request or skipping prior providers.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: ChatResponse,
    pub provider: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("no providers are enabled")]
    NoProvidersEnabled,

    #[error("invalid provider hint: {0}")]
    InvalidProvider(String),

    #[error("provider '{0}' is not enabled")]
    ProviderNotEnabled(String),

    #[error("temperature must be finite and in [0, 2], got {0}")]
    InvalidTemperature(f32),

    #[error("all providers failed (status {status})")]
    AllProvidersFailed {
        status: u16,
        failures: Vec<ProviderFailure>,
    },
}

fn provider_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap())
}

fn normalize_provider_hint(hint: &str) -> std::result::Result<String, RouteError> {
    let normalized = hint.to_lowercase();
    if provider_name_pattern().is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(RouteError::InvalidProvider(hint.to_string()))
    }
}

struct ProviderEntry {
    model: Arc<dyn ChatModel>,
    capabilities: ProviderCapabilities,
}

/// Routes chat requests across a configured set of named providers,
/// applying capability-based request shaping and the shared
/// rate-limiter/circuit-breaker pair around every provider call.
pub struct ProviderRouter {
    providers: HashMap<String, ProviderEntry>,
    enabled: Vec<String>,
    routing: RoutingTable,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl ProviderRouter {
    pub fn new(
        enabled: Vec<String>,
        routing: RoutingTable,
        rate_limiter: RateLimiter,
        circuit_breaker: CircuitBreaker,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            enabled,
            routing,
            rate_limiter,
            circuit_breaker,
        }
    }

    pub fn register_provider(
        &mut self,
        name: impl Into<String>,
        model: Arc<dyn ChatModel>,
        capabilities: ProviderCapabilities,
    ) {
        self.providers
            .insert(name.into(), ProviderEntry { model, capabilities });
    }

    /// Builds the ordered candidate list per §4.5 rules 1-4.
    fn candidates(&self, request: &RouteRequest) -> std::result::Result<Vec<String>, RouteError> {
        if self.enabled.is_empty() {
            return Err(RouteError::NoProvidersEnabled);
        }

        if let Some(hint) = &request.provider {
            let normalized = normalize_provider_hint(hint)?;
            if !self.enabled.iter().any(|p| p == &normalized) {
                return Err(RouteError::ProviderNotEnabled(normalized));
            }
            return Ok(vec![normalized]);
        }

        let mode = request.routing_mode.as_deref().unwrap_or("balanced");
        let priority = self.routing.modes.get(mode).cloned().unwrap_or_default();

        let mut ordered: Vec<String> = priority
            .into_iter()
            .filter(|p| self.enabled.contains(p))
            .collect();
        for provider in &self.enabled {
            if !ordered.contains(provider) {
                ordered.push(provider.clone());
            }
        }
        Ok(ordered)
    }

    /// Strips or validates `request.config.temperature` against the
    /// target provider's declared capabilities, appending a warning to
    /// `warnings` when a caller-supplied value is stripped.
    fn shape_request(
        &self,
        provider: &str,
        mut chat: ChatRequest,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<ChatRequest, RouteError> {
        let entry = self
            .providers
            .get(provider)
            .expect("candidate list only contains registered providers");
        let caps = &entry.capabilities;

        match (caps.supports_temperature, chat.config.temperature) {
            (false, Some(_)) => {
                chat.config.temperature = None;
                warnings.push(format!(
                    "provider '{provider}' does not support temperature; caller value dropped"
                ));
            }
            (true, Some(t)) => {
                if !t.is_finite() || !(0.0..=2.0).contains(&t) {
                    return Err(RouteError::InvalidTemperature(t));
                }
            }
            (true, None) => {
                chat.config.temperature = caps.default_temperature;
            }
            (false, None) => {}
        }

        Ok(chat)
    }

    /// Resolves and invokes providers in order until one succeeds,
    /// returning `AllProvidersFailed` if none do.
    pub async fn route_chat(&self, request: RouteRequest) -> Result<RoutedResponse> {
        let candidates = self
            .candidates(&request)
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let mut warnings = Vec::new();
        let mut failures = Vec::new();

        for provider in candidates {
            let entry = match self.providers.get(&provider) {
                Some(entry) => entry,
                None => {
                    failures.push(ProviderFailure {
                        provider: provider.clone(),
                        message: "provider not registered".to_string(),
                        status: None,
                        retryable: false,
                    });
                    continue;
                }
            };

            let shaped = match self.shape_request(&provider, request.chat.clone(), &mut warnings) {
                Ok(shaped) => shaped,
                Err(e) => {
                    failures.push(ProviderFailure {
                        provider: provider.clone(),
                        message: e.to_string(),
                        status: Some(400),
                        retryable: false,
                    });
                    continue;
                }
            };

            let model = entry.model.clone();
            let circuit_breaker = &self.circuit_breaker;
            let outcome = self
                .rate_limiter
                .schedule(&provider, || {
                    let model = model.clone();
                    let provider = provider.clone();
                    async move {
                        circuit_breaker
                            .execute(&provider, || {
                                let model = model.clone();
                                let shaped = shaped.clone();
                                async move {
                                    model
                                        .chat(shaped)
                                        .await
                                        .map_err(|e| LlmError::ProviderError(e.to_string()))
                                }
                            })
                            .await
                    }
                })
                .await;

            match outcome {
                Ok(response) => {
                    return Ok(RoutedResponse {
                        response,
                        provider,
                        warnings,
                    });
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warnings.push(format!("provider '{provider}' failed: {e}"));
                    failures.push(ProviderFailure {
                        provider,
                        message: e.to_string(),
                        status: None,
                        retryable,
                    });
                }
            }
        }

        let status = failures
            .iter()
            .find_map(|f| f.status.filter(|s| (400..500).contains(s)))
            .or_else(|| failures.last().and_then(|f| f.status))
            .unwrap_or(502);

        Err(LlmError::ProviderError(
            RouteError::AllProvidersFailed { status, failures }.to_string(),
        ))
    }
}
