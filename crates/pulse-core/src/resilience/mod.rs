//! Resilience policies for external source calls.
//!
//! Every call to a source goes through the same ordered chain, outermost
//! first:
//!
//! ```text
//! RateLimiter -> Retry -> CircuitBreaker -> Bulkhead -> fetch
//! ```
//!
//! The rate limiter spends one permit per logical fetch. Each retry attempt
//! is seen separately by the breaker and the bulkhead. When the chain gives
//! up on a transient problem, [`ResiliencePipeline::fetch`] falls back to an
//! empty [`FetchOutcome`] carrying the reason, instead of an error.
//!
//! Pipelines are plain values: build one per source and hand it to the
//! orchestrator. Nothing is looked up by name at call time.

mod bulkhead;
mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{Retry, RetryPolicyConfig};

use std::time::Duration;

use thiserror::Error;

use crate::error::AppError;
use crate::models::{ActivitySource, ExternalRecord, SourceTarget};
use crate::traits::SourceClient;

/// A policy refused to let the call through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyRejection {
    #[error("rate limiter '{name}' had no permit within {waited:?}")]
    RateLimited { name: String, waited: Duration },

    #[error("circuit breaker '{name}' is open (retry after {retry_after:?})")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("bulkhead '{name}' is full ({max_concurrent} concurrent calls)")]
    BulkheadFull { name: String, max_concurrent: usize },
}

/// Error flowing through the policy chain.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Rejected(PolicyRejection),

    #[error(transparent)]
    Inner(AppError),
}

impl From<AppError> for PolicyError {
    fn from(e: AppError) -> Self {
        PolicyError::Inner(e)
    }
}

/// Result of a resilient fetch.
///
/// `degraded` is set only when the fallback produced the result. It is
/// read by the caller of one unit of work and never shared.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<ExternalRecord>,
    pub degraded: Option<String>,
}

impl FetchOutcome {
    pub fn ok(records: Vec<ExternalRecord>) -> Self {
        Self {
            records,
            degraded: None,
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            degraded: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Settings for every policy of one source pipeline.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub rate_limiter: RateLimiterConfig,
    pub retry: RetryPolicyConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub bulkhead: BulkheadConfig,
}

impl ResilienceConfig {
    /// Hardcoded defaults for `source`.
    pub fn for_source(source: ActivitySource) -> Self {
        Self {
            rate_limiter: RateLimiterConfig::for_source(source),
            retry: RetryPolicyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
        }
    }

    /// Defaults for `source` with environment overrides applied.
    pub fn from_env(source: ActivitySource) -> Self {
        Self {
            rate_limiter: RateLimiterConfig::from_env(source),
            retry: RetryPolicyConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            bulkhead: BulkheadConfig::from_env(),
        }
    }
}

/// Ordered policy chain for one source.
#[derive(Clone)]
pub struct ResiliencePipeline {
    source: ActivitySource,
    rate_limiter: RateLimiter,
    retry: Retry,
    circuit_breaker: CircuitBreaker,
    bulkhead: Bulkhead,
}

impl ResiliencePipeline {
    pub fn new(source: ActivitySource, config: ResilienceConfig) -> Self {
        let name = source.as_str().to_lowercase();
        Self {
            source,
            rate_limiter: RateLimiter::new(name.clone(), config.rate_limiter),
            retry: Retry::new(name.clone(), config.retry),
            circuit_breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker),
            bulkhead: Bulkhead::new(name, config.bulkhead),
        }
    }

    pub fn for_source(source: ActivitySource) -> Self {
        Self::new(source, ResilienceConfig::for_source(source))
    }

    pub fn source(&self) -> ActivitySource {
        self.source
    }

    /// Policy names in the order a call passes through them.
    pub fn policy_order(&self) -> [&'static str; 4] {
        ["rate_limiter", "retry", "circuit_breaker", "bulkhead"]
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// Runs `operation` through the full chain.
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T, PolicyError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let (retry, breaker, bulkhead) = (&self.retry, &self.circuit_breaker, &self.bulkhead);
        let operation = &operation;

        self.rate_limiter
            .call(move || {
                retry.call(move || {
                    breaker.call(move || {
                        bulkhead.call(move || async move {
                            operation().await.map_err(PolicyError::Inner)
                        })
                    })
                })
            })
            .await
    }

    /// Fetches through the chain, falling back to a degraded empty outcome
    /// on transient failure or policy rejection.
    ///
    /// Client rejections (4xx) and local errors are returned as `Err`.
    pub async fn fetch<C: SourceClient>(
        &self,
        client: &C,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<FetchOutcome, AppError> {
        let result = self.execute(move || client.fetch(target, page_size)).await;

        match result {
            Ok(records) => Ok(FetchOutcome::ok(records)),
            Err(PolicyError::Rejected(rejection)) => {
                Ok(self.fallback(client, target, &rejection.to_string()))
            }
            Err(PolicyError::Inner(e)) if e.is_retryable() || e.should_trip_circuit() => {
                Ok(self.fallback(client, target, &e.to_string()))
            }
            Err(PolicyError::Inner(e)) => Err(e),
        }
    }

    fn fallback<C: SourceClient>(
        &self,
        client: &C,
        target: &SourceTarget,
        cause: &str,
    ) -> FetchOutcome {
        let reason = format!(
            "{} API unavailable for {}: {}",
            self.source.display_name(),
            client.describe_target(target),
            cause
        );
        tracing::warn!(
            source = %self.source,
            target = %target.identifier,
            reason = %reason,
            "Fallback taken, returning empty result"
        );
        FetchOutcome::degraded(reason)
    }
}
