//! Trait definitions for external collaborators.
//!
//! The orchestrator only talks to these traits:
//!
//! - [`ConfigProvider`]: which tenants exist and how to reach their sources
//! - [`SourceClient`]: one external API
//! - [`ActivityStore`]: idempotent persistence of mapped records
//! - [`JobStore`]: sync job lifecycle
//! - [`SchedulerLock`]: one scheduled run at a time across replicas
//!
//! Production implementations live in `pulse-client` and `pulse-db`; tests
//! use in-memory mocks.
//!
//! # Example
//!
//! ```
//! use pulse_core::traits::{ConfigProvider, SourceClient};
//! use pulse_core::{AppError, ExternalRecord};
//!
//! async fn fetch_for_tenant<P, C>(
//!     provider: &P,
//!     client: &C,
//!     tenant_id: i64,
//! ) -> Result<Vec<ExternalRecord>, AppError>
//! where
//!     P: ConfigProvider,
//!     C: SourceClient,
//! {
//!     let config = provider.get_decrypted_config(tenant_id).await?;
//!     let target = config
//!         .target_for(client.source())
//!         .ok_or(AppError::ConfigNotFound(tenant_id))?;
//!     client.fetch(target, 100).await
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::job::{JobType, SyncJob};
use crate::models::{
    ActivitySource, ExternalRecord, GithubCommit, JiraIssue, SourceTarget, TenantConfig,
    UnifiedActivity,
};
use crate::AppError;

/// Source of tenant identities and their decrypted connection settings.
pub trait ConfigProvider: Send + Sync + Clone {
    /// Tenant ids eligible for scheduled syncs.
    fn list_eligible_tenant_ids(&self) -> impl Future<Output = Result<Vec<i64>, AppError>> + Send;

    /// Connection settings for one tenant, with tokens in clear text.
    ///
    /// Returns [`AppError::ConfigNotFound`] for an unknown tenant.
    fn get_decrypted_config(
        &self,
        tenant_id: i64,
    ) -> impl Future<Output = Result<TenantConfig, AppError>> + Send;
}

/// Client for one external activity source.
pub trait SourceClient: Send + Sync + Clone {
    /// The source this client reads from.
    fn source(&self) -> ActivitySource;

    /// Job type recorded for syncs performed with this client.
    fn job_type(&self) -> JobType;

    /// Fetches up to `page_size` records, most recently updated first.
    ///
    /// Transient failures are returned as errors; the resilience pipeline
    /// decides what to do with them.
    fn fetch(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<ExternalRecord>, AppError>> + Send;

    /// Human-readable description of `target` for logs and fallback reasons.
    fn describe_target(&self, target: &SourceTarget) -> String {
        target.identifier.clone()
    }
}

/// Idempotent store for mapped activity data.
///
/// Every write is an upsert on the natural key, so replaying a batch leaves
/// the store unchanged.
pub trait ActivityStore: Send + Sync + Clone {
    /// Upserts unified activities keyed on `(tenant_id, source, external_id)`.
    ///
    /// # Returns
    ///
    /// The number of rows inserted or updated.
    fn upsert_activities(
        &self,
        activities: &[UnifiedActivity],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts Jira issues keyed on `(tenant_id, issue_key)`.
    fn upsert_jira_issues(
        &self,
        issues: &[JiraIssue],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts GitHub commits keyed on `(tenant_id, commit_sha)`.
    fn upsert_github_commits(
        &self,
        commits: &[GithubCommit],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Store for sync job records.
///
/// Each operation is a single short statement. Terminal writes only apply to
/// jobs that are still RUNNING.
pub trait JobStore: Send + Sync + Clone {
    /// Creates a RUNNING job.
    fn create_job(
        &self,
        tenant_id: i64,
        job_type: JobType,
        correlation_id: &str,
    ) -> impl Future<Output = Result<SyncJob, AppError>> + Send;

    /// Marks a job COMPLETED.
    fn complete_job(
        &self,
        job_id: Uuid,
        records_fetched: usize,
        records_saved: usize,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks a job PARTIAL_FAILURE with the degradation reason.
    fn mark_partial_failure(
        &self,
        job_id: Uuid,
        records_fetched: usize,
        records_saved: usize,
        reason: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks a job FAILED.
    fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Retrieves a job by id.
    fn get_job(&self, job_id: Uuid) -> impl Future<Output = Result<Option<SyncJob>, AppError>> + Send;

    /// Jobs started at or after `since`, newest first.
    fn list_recent_jobs(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<SyncJob>, AppError>> + Send;

    /// Number of FAILED jobs started at or after `since`.
    fn count_recent_failures(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Completion time of the last COMPLETED job for a tenant and job type.
    fn last_successful_sync(
        &self,
        tenant_id: i64,
        job_type: JobType,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;
}

/// Named lock shared by every replica running the scheduler.
///
/// A lock taken with `try_lock` expires on its own after `lock_at_most_for`,
/// so a replica that dies mid-run cannot block the job forever.
pub trait SchedulerLock: Send + Sync + Clone {
    /// Takes the lock unless someone else holds it. Returns `false` when held.
    fn try_lock(
        &self,
        name: &str,
        lock_at_most_for: Duration,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Releases a lock taken by this holder. The lock stays held until at
    /// least `lock_at_least_for` after it was taken.
    fn unlock(
        &self,
        name: &str,
        lock_at_least_for: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
