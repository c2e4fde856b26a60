//! Shared-backend resilience primitives used by [`crate::router::ProviderRouter`]:
//! a keyed sliding-window rate limiter and a keyed circuit breaker. Both are
//! indexed by provider name so every route through a given provider shares
//! the same state, regardless of which graph node or agent issued the call.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{LlmError, Result};

/// Per-key sliding-window admission control. `schedule` blocks the caller
/// until a slot opens rather than rejecting outright, since a rejected LLM
/// call has nowhere cheaper to retry than waiting its turn.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: DashMap<String, Arc<Mutex<Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<Vec<Instant>>> {
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Runs `fn_` once a slot for `key` opens, recording the call against
    /// the window before invoking it.
    pub async fn schedule<F, Fut, T>(&self, key: &str, fn_: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let window = self.window_for(key);
        loop {
            let wait = {
                let mut timestamps = window.lock().await;
                let now = Instant::now();
                timestamps.retain(|t| now.duration_since(*t) < self.window);
                if timestamps.len() < self.max_requests {
                    timestamps.push(now);
                    None
                } else {
                    let oldest = timestamps[0];
                    Some(self.window - now.duration_since(oldest))
                }
            };
            match wait {
                None => break,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
        fn_().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is in flight, to serialize at most one
    /// concurrent probe per key.
    probing: bool,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            probing: false,
        }
    }
}

/// Per-key failure-window circuit breaker: Closed -> Open after
/// `failure_threshold` failures, Open -> HalfOpen after `reset_timeout`
/// elapses (admitting exactly one probe), HalfOpen -> Closed on success or
/// back to Open on failure.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    entries: DashMap<String, Arc<Mutex<BreakerEntry>>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            entries: DashMap::new(),
        }
    }

    fn entry_for(&self, key: &str) -> Arc<Mutex<BreakerEntry>> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::default())))
            .clone()
    }

    pub async fn execute<F, Fut, T>(&self, key: &str, fn_: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let entry = self.entry_for(key);

        {
            let mut state = entry.lock().await;
            match state.state {
                BreakerState::Closed => {}
                BreakerState::Open => {
                    let elapsed = state
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed < self.reset_timeout {
                        return Err(LlmError::ServiceUnavailable(format!(
                            "circuit open for provider '{key}'"
                        )));
                    }
                    state.state = BreakerState::HalfOpen;
                    state.probing = true;
                }
                BreakerState::HalfOpen => {
                    if state.probing {
                        return Err(LlmError::ServiceUnavailable(format!(
                            "circuit half-open probe already in flight for provider '{key}'"
                        )));
                    }
                    state.probing = true;
                }
            }
        }

        let outcome = fn_().await;

        let mut state = entry.lock().await;
        match &outcome {
            Ok(_) => {
                state.state = BreakerState::Closed;
                state.failure_count = 0;
                state.opened_at = None;
                state.probing = false;
            }
            Err(_) => {
                state.failure_count += 1;
                state.probing = false;
                if state.state == BreakerState::HalfOpen
                    || state.failure_count >= self.failure_threshold
                {
                    state.state = BreakerState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
        }
        outcome
    }

    pub async fn is_open(&self, key: &str) -> bool {
        let entry = self.entry_for(key);
        let state = entry.lock().await;
        matches!(state.state, BreakerState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn rate_limiter_admits_up_to_the_window_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            limiter
                .schedule("openai", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LlmError>(())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_rejects_fast() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

        for _ in 0..2 {
            let _ = breaker
                .execute("claude", || async { Err::<(), _>(LlmError::Other("boom".into())) })
                .await;
        }

        assert!(breaker.is_open("claude").await);
        let err = breaker
            .execute("claude", || async { Ok::<_, LlmError>(()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("circuit open"));
    }

    #[tokio::test]
    async fn half_open_probe_succeeds_and_closes_circuit() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));

        let _ = breaker
            .execute("grok", || async { Err::<(), _>(LlmError::Other("boom".into())) })
            .await;
        assert!(breaker.is_open("grok").await);

        tokio::time::sleep(Duration::from_millis(30)).await;

        breaker
            .execute("grok", || async { Ok::<_, LlmError>(()) })
            .await
            .unwrap();
        assert!(!breaker.is_open("grok").await);
    }
}
