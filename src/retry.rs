//! Retry with classified exponential backoff.
//!
//! Failures are classified by substring match on their message. Anything
//! mentioning one of [`NON_RETRYABLE_KEYWORDS`] is surfaced immediately;
//! everything else is retried with `base * 2^n + jitter` seconds of backoff,
//! capped at `max_delay`. The classification is a heuristic: a transient
//! failure whose message happens to say "permission" is not retried.

use crate::errors::RetryError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Message fragments (lowercase) that mark a failure as permanent.
pub const NON_RETRYABLE_KEYWORDS: [&str; 4] =
    ["invalid", "not found", "permission", "authentication"];

/// How a failure message is treated by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    /// Permanent; carries the keyword that matched.
    NonRetryable(&'static str),
}

/// Classify a failure message (case-insensitive).
pub fn classify(message: &str) -> FailureClass {
    let lowered = message.to_lowercase();
    NON_RETRYABLE_KEYWORDS
        .iter()
        .find(|keyword| lowered.contains(*keyword))
        .map_or(FailureClass::Retryable, |keyword| {
            FailureClass::NonRetryable(*keyword)
        })
}

/// Backoff configuration (`[retry]` in conductor.toml).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 behaves like 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial delay in seconds.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    /// Cap on any single delay, in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    2.0
}

fn default_max_delay_secs() -> f64 {
    30.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_secs: base_delay.as_secs_f64(),
            max_delay_secs: max_delay.as_secs_f64(),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt_index`
    /// (0-based), given a jitter sample in `[0, 1)` seconds.
    pub fn delay_for(&self, attempt_index: u32, jitter: f64) -> Duration {
        let exponent = attempt_index.min(62) as i32;
        let raw = self.base_delay_secs.max(0.0) * 2f64.powi(exponent) + jitter.clamp(0.0, 1.0);
        let capped = raw.min(self.max_delay_secs.max(0.0));
        // inf or beyond u64 seconds
        Duration::try_from_secs_f64(capped).unwrap_or(Duration::MAX)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A notable moment in a retried operation.
#[derive(Debug, Clone, Copy)]
pub enum RetryEvent<'a> {
    /// Attempt `attempt` of `max_attempts` failed; sleeping `delay`.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: &'a str,
    },
    /// Failure matched a permanent keyword; no further attempts.
    NonRetryable { keyword: &'static str, error: &'a str },
    /// Every attempt failed.
    Exhausted { attempts: u32, error: &'a str },
}

/// Receives retry events for operational visibility. Implementations must
/// not panic; the signature leaves no way to fail.
pub trait RetryObserver: Send + Sync {
    fn observe(&self, event: RetryEvent<'_>);
}

/// Default observer: structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn observe(&self, event: RetryEvent<'_>) {
        match event {
            RetryEvent::Retrying {
                attempt,
                max_attempts,
                delay,
                error,
            } => tracing::warn!(
                attempt,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                "attempt failed, retrying: {}",
                error
            ),
            RetryEvent::NonRetryable { keyword, error } => {
                tracing::error!(keyword, "non-retryable error: {}", error)
            }
            RetryEvent::Exhausted { attempts, error } => {
                tracing::error!(attempts, "all attempts failed, last error: {}", error)
            }
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default tracing observer.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails permanently, or runs out
    /// of attempts. Backoff sleeps yield to the runtime.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;
            let message = err.to_string();

            if let FailureClass::NonRetryable(keyword) = classify(&message) {
                self.observer.observe(RetryEvent::NonRetryable {
                    keyword,
                    error: &message,
                });
                return Err(RetryError::NonRetryable {
                    keyword,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                self.observer.observe(RetryEvent::Exhausted {
                    attempts: attempt,
                    error: &message,
                });
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.policy.delay_for(attempt - 1, fastrand::f64());
            self.observer.observe(RetryEvent::Retrying {
                attempt,
                max_attempts,
                delay,
                error: &message,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
