//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use super::PolicyError;
use crate::config::env_or;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicyConfig {
    /// Reads `RETRY_MAX_ATTEMPTS` and `RETRY_INITIAL_DELAY_MS`.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", default.max_attempts),
            initial_delay: Duration::from_millis(env_or(
                "RETRY_INITIAL_DELAY_MS",
                default.initial_delay.as_millis() as u64,
            )),
            ..default
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone)]
pub struct Retry {
    name: String,
    config: RetryPolicyConfig,
}

impl Retry {
    pub fn new(name: impl Into<String>, config: RetryPolicyConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts run out. Policy rejections from inner layers are
    /// returned as-is.
    pub async fn call<F, T, Fut>(&self, mut operation: F) -> Result<T, PolicyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(PolicyError::Inner(e)) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        retry = %self.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
