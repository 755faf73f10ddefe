//! Correlation context for one unit of work.
//!
//! A [`CorrelationContext`] is built when a tenant is submitted to the pool
//! and moved into the spawned task. [`CorrelationContext::scope`] makes it
//! visible to everything the task awaits, both as a `tracing` span and via
//! [`CorrelationContext::current`]. The context is entered only while the
//! task is being polled, so nothing leaks onto the worker thread afterwards.

use std::future::Future;

use tracing::Instrument;

use crate::job::JobType;

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

/// Correlation data carried by one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub correlation_id: String,
    pub tenant_id: i64,
    pub job_type: JobType,
}

impl CorrelationContext {
    pub fn new(correlation_id: impl Into<String>, tenant_id: i64, job_type: JobType) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            tenant_id,
            job_type,
        }
    }

    /// Generates a batch correlation id of the form `SYNC-xxxxxxxx`.
    pub fn new_batch_id() -> String {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("SYNC-{}", &uuid[..8])
    }

    /// Runs `fut` with this context installed.
    pub fn scope<F>(self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let span = tracing::info_span!(
            "sync_unit",
            correlation_id = %self.correlation_id,
            tenant_id = self.tenant_id,
            job_type = %self.job_type,
        );
        CURRENT.scope(self, fut.instrument(span))
    }

    /// The context of the current task, if it runs inside [`Self::scope`].
    pub fn current() -> Option<CorrelationContext> {
        CURRENT.try_with(Clone::clone).ok()
    }
}
