//! Semaphore bulkhead limiting concurrent calls to one source.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{PolicyError, PolicyRejection};
use crate::config::env_or;

#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub max_concurrent_calls: usize,
    /// Zero means reject immediately when full.
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 5,
            max_wait: Duration::ZERO,
        }
    }
}

impl BulkheadConfig {
    /// Reads `SYNC_POOL_SIZE`, which also sizes the orchestrator pool.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_calls: env_or("SYNC_POOL_SIZE", 5usize).max(1),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
}

impl Bulkhead {
    /// A limit of zero is raised to one.
    pub fn new(name: impl Into<String>, mut config: BulkheadConfig) -> Self {
        config.max_concurrent_calls = config.max_concurrent_calls.max(1);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            name: name.into(),
            config,
            semaphore,
        }
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.config.max_concurrent_calls
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, PolicyRejection> {
        let full = || PolicyRejection::BulkheadFull {
            name: self.name.clone(),
            max_concurrent: self.config.max_concurrent_calls,
        };

        if self.config.max_wait.is_zero() {
            return self.semaphore.clone().try_acquire_owned().map_err(|_| full());
        }

        match tokio::time::timeout(self.config.max_wait, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(full()),
        }
    }

    /// Runs `operation` while holding a permit.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, PolicyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>>,
    {
        let _permit = self.acquire().await.map_err(|rejection| {
            tracing::warn!(
                bulkhead = %self.name,
                max_concurrent = self.config.max_concurrent_calls,
                "Bulkhead full, rejecting call"
            );
            PolicyError::Rejected(rejection)
        })?;
        operation().await
    }
}
