//! Per-tenant sync orchestration.
//!
//! One [`SyncOrchestrator`] serves one source. A full sync fans out over every
//! eligible tenant:
//!
//! ```text
//! execute_full_sync
//!   1. correlation id SYNC-xxxxxxxx, eligible tenant ids
//!   2. per tenant: take a pool permit or reject the tenant
//!   3. per admitted tenant, on its own task:
//!        create_job -> get_decrypted_config -> pipeline.fetch
//!        -> map -> upsert -> COMPLETED | PARTIAL_FAILURE | FAILED
//!   4. join every task, aggregate a BatchSyncSummary
//! ```
//!
//! The pool never queues: when all permits are taken the tenant is skipped
//! and counted, and the rest of the batch carries on. A failing or panicking
//! unit never affects its siblings.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::context::CorrelationContext;
use crate::error::AppError;
use crate::job::{BatchSyncSummary, JobStatus, JobType, SyncResult};
use crate::mapper::DataMapper;
use crate::metrics::SyncMetrics;
use crate::resilience::ResiliencePipeline;
use crate::traits::{ActivityStore, ConfigProvider, JobStore, SourceClient};

// =============================================================================
// Sync Events
// =============================================================================

/// Events emitted by the orchestrator and the scheduler.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    /// A batch is about to fan out.
    BatchStarted {
        correlation_id: &'a str,
        job_type: JobType,
        tenants: usize,
    },
    /// Eligible tenants could not be listed; the batch is skipped.
    TenantsUnavailable { job_type: JobType, error: &'a str },
    /// The worker pool was full when the tenant was submitted.
    TenantRejected { tenant_id: i64, job_type: JobType },
    /// One per-tenant unit finished.
    UnitFinished { result: &'a SyncResult },
    /// Every admitted unit has finished.
    BatchFinished { summary: &'a BatchSyncSummary },
    /// The scheduler registered a recurring sync.
    ScheduleRegistered {
        job_type: JobType,
        interval_secs: u64,
    },
    /// A scheduled run did not start.
    ScheduledRunSkipped { job_type: JobType, reason: &'a str },
    /// The scheduler stopped after cancellation.
    SchedulerStopped,
}

// =============================================================================
// Sync Reporter Trait
// =============================================================================

/// Trait for reporting sync events.
pub trait SyncReporter: Send + Sync {
    /// Called when a sync event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

/// Silent reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSyncReporter;

impl SyncReporter for SilentSyncReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSyncReporter;

impl SyncReporter for TracingSyncReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::BatchStarted {
                correlation_id,
                job_type,
                tenants,
            } => {
                info!(correlation_id, %job_type, tenants, "Starting full sync");
            }
            SyncEvent::TenantsUnavailable { job_type, error } => {
                error!(%job_type, error, "Could not list eligible tenants, skipping sync");
            }
            SyncEvent::TenantRejected {
                tenant_id,
                job_type,
            } => {
                error!(tenant_id, %job_type, "Sync pool full, tenant rejected");
            }
            SyncEvent::UnitFinished { result } => match result.status {
                JobStatus::Completed => info!(
                    tenant_id = result.tenant_id,
                    job_type = %result.job_type,
                    fetched = result.records_fetched,
                    saved = result.records_saved,
                    duration_ms = result.duration_ms,
                    "Sync completed"
                ),
                JobStatus::PartialFailure => warn!(
                    tenant_id = result.tenant_id,
                    job_type = %result.job_type,
                    reason = result.degraded_reason.as_deref().unwrap_or(""),
                    "Sync finished degraded"
                ),
                _ => error!(
                    tenant_id = result.tenant_id,
                    job_type = %result.job_type,
                    error = result.error_message.as_deref().unwrap_or(""),
                    "Sync failed"
                ),
            },
            SyncEvent::BatchFinished { summary } => {
                info!(
                    correlation_id = %summary.correlation_id,
                    total = summary.total_tenants,
                    completed = summary.completed(),
                    partial = summary.partial(),
                    failed = summary.failed(),
                    rejected = summary.rejected.len(),
                    saved = summary.total_records_saved(),
                    "Full sync finished"
                );
            }
            SyncEvent::ScheduleRegistered {
                job_type,
                interval_secs,
            } => {
                info!(%job_type, interval_secs, "Recurring sync registered");
            }
            SyncEvent::ScheduledRunSkipped { job_type, reason } => {
                info!(%job_type, reason, "Scheduled sync skipped");
            }
            SyncEvent::SchedulerStopped => {
                info!("Scheduler stopped");
            }
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// What a unit produced before its terminal status was decided.
struct UnitOutput {
    fetched: usize,
    saved: usize,
    degraded: Option<String>,
}

/// Runs syncs for one source across all tenants.
///
/// # Type Parameters
///
/// * `P` - Configuration provider (e.g., `FileConfigProvider`)
/// * `C` - Source client (e.g., `JiraClient`)
/// * `S` - Activity store (e.g., `ActivityRepository`)
/// * `J` - Job store (e.g., `JobRepository`)
pub struct SyncOrchestrator<P, C, S, J>
where
    P: ConfigProvider,
    C: SourceClient,
    S: ActivityStore,
    J: JobStore,
{
    provider: P,
    client: C,
    pipeline: Arc<ResiliencePipeline>,
    activity_store: S,
    job_store: J,
    mapper: DataMapper,
    metrics: Arc<dyn SyncMetrics>,
    pool: Arc<Semaphore>,
    config: SyncConfig,
}

impl<P, C, S, J> Clone for SyncOrchestrator<P, C, S, J>
where
    P: ConfigProvider,
    C: SourceClient,
    S: ActivityStore,
    J: JobStore,
{
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            client: self.client.clone(),
            pipeline: Arc::clone(&self.pipeline),
            activity_store: self.activity_store.clone(),
            job_store: self.job_store.clone(),
            mapper: self.mapper.clone(),
            metrics: Arc::clone(&self.metrics),
            pool: Arc::clone(&self.pool),
            config: self.config.clone(),
        }
    }
}

impl<P, C, S, J> SyncOrchestrator<P, C, S, J>
where
    P: ConfigProvider + 'static,
    C: SourceClient + 'static,
    S: ActivityStore + 'static,
    J: JobStore + 'static,
{
    /// Creates an orchestrator.
    ///
    /// The worker pool gets exactly as many permits as the pipeline's
    /// bulkhead, so saturation shows up as a rejected tenant rather than a
    /// degraded fetch.
    pub fn new(
        provider: P,
        client: C,
        pipeline: Arc<ResiliencePipeline>,
        activity_store: S,
        job_store: J,
        metrics: Arc<dyn SyncMetrics>,
        config: SyncConfig,
    ) -> Self {
        let pool_size = pipeline.bulkhead().max_concurrent_calls();
        Self {
            provider,
            client,
            pool: Arc::new(Semaphore::new(pool_size)),
            pipeline,
            activity_store,
            job_store,
            mapper: DataMapper::new(Arc::clone(&metrics)),
            metrics,
            config,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.client.job_type()
    }

    /// Number of units that may run at once.
    pub fn pool_size(&self) -> usize {
        self.pipeline.bulkhead().max_concurrent_calls()
    }

    /// Syncs every eligible tenant without reporting events.
    pub async fn execute_full_sync(&self) -> BatchSyncSummary {
        self.execute_full_sync_with_reporter(&SilentSyncReporter).await
    }

    /// Syncs every eligible tenant, reporting progress to `reporter`.
    pub async fn execute_full_sync_with_reporter<R: SyncReporter>(
        &self,
        reporter: &R,
    ) -> BatchSyncSummary {
        let correlation_id = CorrelationContext::new_batch_id();
        let job_type = self.job_type();

        let mut summary = BatchSyncSummary {
            correlation_id: correlation_id.clone(),
            ..Default::default()
        };

        let tenant_ids = match self.provider.list_eligible_tenant_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                reporter.report(SyncEvent::TenantsUnavailable {
                    job_type,
                    error: &e.to_string(),
                });
                return summary;
            }
        };

        summary.total_tenants = tenant_ids.len();
        reporter.report(SyncEvent::BatchStarted {
            correlation_id: &correlation_id,
            job_type,
            tenants: tenant_ids.len(),
        });

        // Submission does not await, so rejection depends only on how many
        // permits are taken at this instant.
        let mut tasks = JoinSet::new();

        for tenant_id in tenant_ids {
            let permit = match Arc::clone(&self.pool).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.metrics.task_rejected(job_type);
                    summary.rejected.push(tenant_id);
                    reporter.report(SyncEvent::TenantRejected {
                        tenant_id,
                        job_type,
                    });
                    continue;
                }
            };
            self.report_pool_usage();

            let ctx = CorrelationContext::new(correlation_id.clone(), tenant_id, job_type);
            let this = self.clone();
            let unit_correlation_id = correlation_id.clone();

            tasks.spawn(ctx.scope(async move {
                let unit = AssertUnwindSafe(this.run_unit(tenant_id, &unit_correlation_id))
                    .catch_unwind()
                    .await;
                drop(permit);
                this.report_pool_usage();
                unit.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!(tenant_id, panic = %message, "Sync unit panicked");
                    this.aborted_result(tenant_id, &unit_correlation_id, message)
                })
            }));
        }

        if !summary.rejected.is_empty() {
            self.metrics.batch_partial_rejection(job_type);
            warn!(
                correlation_id = %correlation_id,
                %job_type,
                rejected = summary.rejected.len(),
                total = summary.total_tenants,
                "Sync batch partially rejected, pool saturated"
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    reporter.report(SyncEvent::UnitFinished { result: &result });
                    summary.results.push(result);
                }
                Err(e) => error!(%job_type, error = %e, "Sync task did not complete"),
            }
        }

        summary.results.sort_by_key(|r| r.tenant_id);
        reporter.report(SyncEvent::BatchFinished { summary: &summary });
        summary
    }

    /// Runs one unit for `tenant_id` on the caller's task.
    ///
    /// Still takes a pool permit, so a manual trigger during a saturated
    /// batch is rejected the same way a batch member would be.
    pub async fn sync_tenant(&self, tenant_id: i64) -> Result<SyncResult, AppError> {
        let job_type = self.job_type();
        let _permit = match Arc::clone(&self.pool).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.task_rejected(job_type);
                error!(tenant_id, %job_type, "Sync pool full, tenant rejected");
                return Err(AppError::Generic(format!(
                    "sync pool saturated, tenant {} not scheduled",
                    tenant_id
                )));
            }
        };

        let correlation_id = CorrelationContext::new_batch_id();
        let ctx = CorrelationContext::new(correlation_id.clone(), tenant_id, job_type);
        Ok(ctx.scope(self.run_unit(tenant_id, &correlation_id)).await)
    }

    /// Executes one unit of work and writes its terminal status.
    ///
    /// Never fails: every error ends up in the job record and the result.
    /// The job row is created before the panic boundary, so a panic during
    /// fetch or persistence still moves it to FAILED.
    async fn run_unit(&self, tenant_id: i64, correlation_id: &str) -> SyncResult {
        let started = Instant::now();
        let job_type = self.job_type();
        self.metrics.job_started(job_type);

        let mut result = SyncResult {
            job_id: None,
            tenant_id,
            job_type,
            status: JobStatus::Failed,
            degraded_reason: None,
            records_fetched: 0,
            records_saved: 0,
            duration_ms: 0,
            error_message: None,
            correlation_id: correlation_id.to_string(),
        };

        let job_id = match self
            .job_store
            .create_job(tenant_id, job_type, correlation_id)
            .await
        {
            Ok(job) => job.id,
            Err(e) => {
                error!(tenant_id, error = %e, "Failed to create sync job");
                result.error_message = Some(e.to_string());
                return self.finish(result, started);
            }
        };
        result.job_id = Some(job_id);
        info!(tenant_id, %job_id, "Sync unit started");

        let work = match AssertUnwindSafe(self.fetch_and_persist(tenant_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(payload) => Err(format!(
                "sync unit panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        match work {
            Ok(output) => {
                result.records_fetched = output.fetched;
                result.records_saved = output.saved;
                match output.degraded {
                    None => {
                        result.status = JobStatus::Completed;
                        let write = self
                            .job_store
                            .complete_job(job_id, output.fetched, output.saved)
                            .await;
                        self.log_terminal_write(job_id, JobStatus::Completed, write);
                    }
                    Some(reason) => {
                        result.status = JobStatus::PartialFailure;
                        let write = self
                            .job_store
                            .mark_partial_failure(job_id, output.fetched, output.saved, &reason)
                            .await;
                        self.log_terminal_write(job_id, JobStatus::PartialFailure, write);
                        result.degraded_reason = Some(reason);
                    }
                }
            }
            Err(message) => {
                error!(tenant_id, %job_id, error = %message, "Sync unit failed");
                let write = self.job_store.fail_job(job_id, &message).await;
                self.log_terminal_write(job_id, JobStatus::Failed, write);
                result.error_message = Some(message);
            }
        }

        self.finish(result, started)
    }

    async fn fetch_and_persist(&self, tenant_id: i64) -> Result<UnitOutput, AppError> {
        let source = self.client.source();
        let config = self.provider.get_decrypted_config(tenant_id).await?;
        let target = config.target_for(source).ok_or_else(|| {
            AppError::ConfigError(format!(
                "tenant {} has no {} configuration",
                tenant_id,
                source.display_name()
            ))
        })?;

        let outcome = self
            .pipeline
            .fetch(&self.client, target, self.config.page_size)
            .await?;
        let fetched = outcome.records.len();
        info!(
            tenant_id,
            fetched,
            degraded = outcome.is_degraded(),
            "Fetched records from {}",
            source.display_name()
        );

        let batch = self.mapper.map_all(tenant_id, &outcome.records);
        let saved = self.activity_store.upsert_activities(&batch.activities).await?;
        if !batch.issues.is_empty() {
            self.activity_store.upsert_jira_issues(&batch.issues).await?;
        }
        if !batch.commits.is_empty() {
            self.activity_store
                .upsert_github_commits(&batch.commits)
                .await?;
        }

        Ok(UnitOutput {
            fetched,
            saved: saved as usize,
            degraded: outcome.degraded,
        })
    }

    fn log_terminal_write(&self, job_id: Uuid, status: JobStatus, write: Result<(), AppError>) {
        if let Err(e) = write {
            error!(%job_id, %status, error = %e, "Failed to record terminal job status");
        }
    }

    fn finish(&self, mut result: SyncResult, started: Instant) -> SyncResult {
        let elapsed = started.elapsed();
        result.duration_ms = elapsed.as_millis() as u64;

        self.metrics.job_finished(
            result.job_type,
            result.status,
            elapsed,
            result.records_fetched,
            result.records_saved,
        );

        let source = self.pipeline.source();
        self.metrics
            .circuit_state(source, self.pipeline.circuit_breaker().state());
        self.metrics
            .bulkhead_available(source, self.pipeline.bulkhead().available_permits());
        result
    }

    fn aborted_result(&self, tenant_id: i64, correlation_id: &str, panic: String) -> SyncResult {
        SyncResult {
            job_id: None,
            tenant_id,
            job_type: self.job_type(),
            status: JobStatus::Failed,
            degraded_reason: None,
            records_fetched: 0,
            records_saved: 0,
            duration_ms: 0,
            error_message: Some(format!("sync unit panicked: {}", panic)),
            correlation_id: correlation_id.to_string(),
        }
    }

    fn report_pool_usage(&self) {
        let available = self.pool.available_permits();
        let active = self.pool_size().saturating_sub(available);
        self.metrics.pool_usage(self.job_type(), active, available);
    }
}

/// Text of a panic payload, as passed to `panic!`.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
