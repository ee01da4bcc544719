//! Retry policy with exponential backoff for transient provider failures
//!
//! Only rate/quota-classified errors are retried. Each adapter call moves
//! through `PENDING -> (RETRYING)* -> SUCCEEDED | FAILED`; no state survives
//! the call.

use crate::protocol::ProviderKind;
use crate::providers::error::{ProviderError, ProviderResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Base for exponential backoff (2.0 doubles each attempt)
    pub exponential_base: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays; 0 keeps backoff exact
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom retry bound
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Policy with short delays, for tests
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            exponential_base: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Calculate the backoff delay for a given retry attempt (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let delay = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(delay as u64)
    }

    /// Whether another attempt should be made after this error
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_rate_limited()
    }
}

/// Executor driving an operation through the retry state machine
pub struct RetryExecutor {
    policy: RetryPolicy,
    provider: ProviderKind,
}

impl RetryExecutor {
    /// Create a new retry executor for one provider's operations
    pub fn new(policy: RetryPolicy, provider: ProviderKind) -> Self {
        Self { policy, provider }
    }

    /// Execute an operation, retrying rate-limited failures with backoff.
    ///
    /// Non-transient failures propagate immediately. Exhausting the retry
    /// budget yields [`ProviderError::RetryLimitReached`].
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_rate_limited() {
                        return Err(error);
                    }
                    if attempt >= self.policy.max_retries {
                        warn!(
                            provider = %self.provider,
                            attempts = attempt + 1,
                            "retry budget exhausted"
                        );
                        return Err(ProviderError::RetryLimitReached {
                            provider: self.provider,
                            attempts: attempt + 1,
                        });
                    }

                    let delay = self.policy.calculate_delay(attempt);
                    warn!(
                        provider = %self.provider,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
