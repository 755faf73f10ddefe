//! Rate limiter backed by `governor`.
//!
//! Allows `limit_for_period` calls per `refresh_period` as a GCRA quota with
//! a burst of the full period. A caller that finds no capacity waits, but
//! never longer than `timeout`.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};

use super::{PolicyError, PolicyRejection};
use crate::config::env_or;
use crate::models::ActivitySource;

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Permits available in each period.
    pub limit_for_period: u32,
    /// Length of one period.
    pub refresh_period: Duration,
    /// Longest a caller waits for a permit.
    pub timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit_for_period: 10,
            refresh_period: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RateLimiterConfig {
    /// Per-source defaults: Jira allows 10 requests per second, GitHub 30.
    pub fn for_source(source: ActivitySource) -> Self {
        let limit_for_period = match source {
            ActivitySource::Jira => 10,
            ActivitySource::Github => 30,
        };
        Self {
            limit_for_period,
            ..Self::default()
        }
    }

    /// Applies `RATE_LIMIT_<SOURCE>_PER_SEC` on top of the source defaults.
    pub fn from_env(source: ActivitySource) -> Self {
        let default = Self::for_source(source);
        let key = format!("RATE_LIMIT_{}_PER_SEC", source.as_str());
        Self {
            limit_for_period: env_or(&key, default.limit_for_period),
            ..default
        }
    }

    /// Quota for this config, `None` when no calls are allowed at all.
    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.limit_for_period)?;
        let quota = Quota::with_period(self.refresh_period / self.limit_for_period)
            .unwrap_or_else(|| Quota::per_second(burst));
        Some(quota.allow_burst(burst))
    }
}

/// Thread-safe rate limiter shared by every call to one source.
#[derive(Clone)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let limiter = config
            .quota()
            .map(|quota| Arc::new(governor::RateLimiter::direct(quota)));
        Self {
            name: name.into(),
            config,
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes one permit, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<(), PolicyRejection> {
        let Some(limiter) = &self.limiter else {
            return Err(self.rejected());
        };

        if limiter.check().is_ok() {
            return Ok(());
        }
        if self.config.timeout.is_zero() {
            return Err(self.rejected());
        }

        match tokio::time::timeout(self.config.timeout, limiter.until_ready()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::debug!(
                    limiter = %self.name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "No rate limiter permit within timeout"
                );
                Err(self.rejected())
            }
        }
    }

    /// Runs `operation` once a permit is available.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, PolicyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>>,
    {
        self.acquire().await.map_err(PolicyError::Rejected)?;
        operation().await
    }

    fn rejected(&self) -> PolicyRejection {
        PolicyRejection::RateLimited {
            name: self.name.clone(),
            waited: self.config.timeout,
        }
    }
}
