//! Multi-window rate limit evaluation
//!
//! The limiter is observational: it counts and reports, it never rejects.
//! Counting continues past the limit so the classifier can tell a mild
//! overrun from sustained abuse.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use super::store::{CounterStore, CounterValue};
use crate::config::RateLimitWindow;

/// Outcome of one window for one request
#[derive(Debug, Clone, Serialize)]
pub struct WindowEvaluation {
    /// The configured window
    pub window: RateLimitWindow,
    /// Count after this request's increment
    pub current_count: u64,
    /// Whether `current_count` is above `max_requests`
    pub exceeded: bool,
    /// When the window's counter resets
    pub reset_time: DateTime<Utc>,
    /// The counter store failed and this evaluation is a fail-open placeholder
    pub degraded: bool,
}

impl WindowEvaluation {
    /// `current_count / max_requests`; unbounded when the window allows nothing
    pub fn violation_ratio(&self) -> f64 {
        if self.window.max_requests == 0 {
            f64::INFINITY
        } else {
            self.current_count as f64 / self.window.max_requests as f64
        }
    }
}

/// Aggregate rate limit outcome for one request
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    /// Rate limit subject (`user:{id}` or `ip:{address}`)
    pub identity: String,
    /// One entry per configured window, in configuration order
    pub evaluations: Vec<WindowEvaluation>,
    /// Whether any window was exceeded
    pub exceeded: bool,
    /// Count of the window with the highest violation ratio
    pub max_count: u64,
    /// Reset time of the window with the highest violation ratio
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitResult {
    /// Result for a request with no windows configured
    pub fn empty(identity: impl Into<String>) -> Self {
        Self::from_evaluations(identity, Vec::new())
    }

    /// Aggregate per-window evaluations
    pub fn from_evaluations(identity: impl Into<String>, evaluations: Vec<WindowEvaluation>) -> Self {
        let exceeded = evaluations.iter().any(|e| e.exceeded);

        let worst = evaluations.iter().fold(None::<&WindowEvaluation>, |worst, e| match worst {
            Some(w) if w.violation_ratio() >= e.violation_ratio() => Some(w),
            _ => Some(e),
        });

        Self {
            identity: identity.into(),
            exceeded,
            max_count: worst.map(|w| w.current_count).unwrap_or(0),
            reset_time: worst.map(|w| w.reset_time),
            evaluations,
        }
    }

    /// Count used by the severity cascade: `max_count` when exceeded, else 0
    pub fn violation_count(&self) -> u64 {
        if self.exceeded {
            self.max_count
        } else {
            0
        }
    }

    /// Whether any window fell back to fail-open
    pub fn degraded(&self) -> bool {
        self.evaluations.iter().any(|e| e.degraded)
    }
}

/// Evaluates fixed rate limit windows against a shared counter store
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    windows: Vec<RateLimitWindow>,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a limiter over `store` with the default windows to evaluate
    pub fn new(
        store: Arc<dyn CounterStore>,
        windows: Vec<RateLimitWindow>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            windows,
            store_timeout,
        }
    }

    /// Configured windows
    pub fn windows(&self) -> &[RateLimitWindow] {
        &self.windows
    }

    /// Evaluate the configured windows for `identity`
    pub async fn check(&self, identity: &str) -> RateLimitResult {
        self.evaluate(identity, &self.windows).await
    }

    /// Evaluate `windows` for `identity`
    ///
    /// Every window is incremented, even one that is already exceeded.
    /// Windows sharing a duration share one counter, which is incremented
    /// once per request. A store failure or timeout fails open for the
    /// affected windows only: they report a count of 1 and not exceeded.
    pub async fn evaluate(&self, identity: &str, windows: &[RateLimitWindow]) -> RateLimitResult {
        let mut durations: Vec<u64> = Vec::with_capacity(windows.len());
        for window in windows {
            if !durations.contains(&window.window_duration) {
                durations.push(window.window_duration);
            }
        }

        let counters = join_all(
            durations
                .iter()
                .map(|duration| self.increment(identity, *duration)),
        )
        .await;

        let evaluations = windows
            .iter()
            .map(|window| {
                let value = durations
                    .iter()
                    .position(|d| *d == window.window_duration)
                    .and_then(|i| counters[i]);
                evaluation(*window, value)
            })
            .collect();

        RateLimitResult::from_evaluations(identity, evaluations)
    }

    async fn increment(&self, identity: &str, window_duration: u64) -> Option<CounterValue> {
        let key = counter_key(identity, window_duration);
        let ttl = Duration::from_secs(window_duration);

        match tokio::time::timeout(self.store_timeout, self.store.increment(&key, ttl)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Counter store failed, rate limit failing open");
                None
            }
            Err(_) => {
                tracing::warn!(
                    key = %key,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Counter store timed out, rate limit failing open"
                );
                None
            }
        }
    }
}

fn evaluation(window: RateLimitWindow, value: Option<CounterValue>) -> WindowEvaluation {
    match value {
        Some(CounterValue {
            count,
            ttl_remaining,
        }) => WindowEvaluation {
            window,
            current_count: count,
            exceeded: count > window.max_requests,
            reset_time: reset_at(ttl_remaining),
            degraded: false,
        },
        None => WindowEvaluation {
            window,
            current_count: 1,
            exceeded: false,
            reset_time: reset_at(window.duration()),
            degraded: true,
        },
    }
}

/// Counter key for one identity and window length: `rate_limit:{identity}:{window_duration}`
pub fn counter_key(identity: &str, window_duration: u64) -> String {
    format!("rate_limit:{}:{}", identity, window_duration)
}

fn reset_at(remaining: Duration) -> DateTime<Utc> {
    let remaining = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + remaining
}
