//! Integration tests for SyncOrchestrator.
//!
//! These tests verify per-tenant fan-out, job lifecycle and degradation
//! using mock implementations.

use crate::integration::common::{Behavior, Harness, MockConfigProvider, issue};
use pulse_core::job::{JobStatus, JobType};
use pulse_core::{ActivitySource, AppError, ResilienceConfig, ResiliencePipeline, SyncConfig};

const ISSUE_CREATED: &str = "2024-01-15T10:30:00.000+0000";

/// Test 1: Verify that syncing the same data twice is idempotent.
///
/// Running two full syncs over an unchanged remote should:
/// - Complete both runs
/// - Leave the activity row count unchanged after the second run
#[tokio::test]
async fn test_full_sync_is_idempotent() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Records(vec![
            issue("PROJ-1", "First", "2024-01-16T08:00:00.000+0000"),
            issue("PROJ-2", "Second", "2024-01-16T09:00:00.000+0000"),
        ]),
    );

    // Act
    let first = h.orchestrator.execute_full_sync().await;
    let count_after_first = h.store.activity_count();
    let second = h.orchestrator.execute_full_sync().await;

    // Assert
    assert!(first.all_successful());
    assert!(second.all_successful());
    assert_eq!(count_after_first, 2);
    assert_eq!(h.store.activity_count(), 2, "Re-sync must not duplicate rows");
    assert_eq!(h.store.issue_count(), 2);
    assert_eq!(h.jobs.for_tenant(1).len(), 2, "One job per run");
}

/// Test 2: Verify that an amended issue updates in place.
///
/// When the same issue key comes back with a new summary, the sync should:
/// - Overwrite the mutable fields
/// - Keep the original created_at
/// - Not add a row
#[tokio::test]
async fn test_amended_issue_updates_in_place() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Records(vec![issue("PROJ-1", "Initial", ISSUE_CREATED)]),
    );
    h.orchestrator.execute_full_sync().await;
    let original = h.store.activity(1, "PROJ-1").unwrap();

    h.client.set(
        1,
        Behavior::Records(vec![issue(
            "PROJ-1",
            "Amended",
            "2024-02-01T12:00:00.000+0000",
        )]),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert!(summary.all_successful());
    assert_eq!(h.store.activity_count(), 1);

    let amended = h.store.activity(1, "PROJ-1").unwrap();
    assert_eq!(amended.title.as_deref(), Some("Amended"));
    assert_eq!(amended.created_at, original.created_at);
    assert!(amended.updated_at > original.updated_at);

    let row = h.store.issue(1, "PROJ-1").unwrap();
    assert_eq!(row.summary.as_deref(), Some("Amended"));
}

/// Test 3: Verify that an empty fetch completes with zero counts.
#[tokio::test]
async fn test_empty_fetch_completes() {
    // Arrange
    let h = Harness::new(&[1]);

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.results.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.records_fetched, 0);
    assert_eq!(result.records_saved, 0);
    assert!(result.degraded_reason.is_none());

    let jobs = h.jobs.for_tenant(1);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert!(jobs[0].completed_at.is_some());
}

/// Test 4: Verify that a transient outage degrades one tenant only.
///
/// When one tenant's remote keeps failing with a network error, the sync
/// should:
/// - Retry, then fall back to an empty result for that tenant
/// - Mark that job PARTIAL_FAILURE with a reason naming the target
/// - Complete the sibling tenants normally
#[tokio::test(start_paused = true)]
async fn test_transient_outage_degrades_single_tenant() {
    // Arrange
    let h = Harness::new(&[1, 2, 3]);
    h.client.set(
        1,
        Behavior::Records(vec![issue("PROJ-1", "One", ISSUE_CREATED)]),
    );
    h.client.set(
        2,
        Behavior::Fail(|| AppError::NetworkError("connection reset".into())),
    );
    h.client.set(
        3,
        Behavior::Records(vec![issue("PROJ-3", "Three", ISSUE_CREATED)]),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.partial(), 1);
    assert_eq!(summary.failed(), 0);

    let degraded = &summary.results[1];
    assert_eq!(degraded.tenant_id, 2);
    assert_eq!(degraded.status, JobStatus::PartialFailure);
    assert_eq!(degraded.records_saved, 0);
    assert!(degraded.error_message.is_none());
    let reason = degraded.degraded_reason.as_deref().unwrap();
    assert!(reason.contains("Jira API unavailable"), "reason: {}", reason);
    assert!(reason.contains("PROJ2"), "reason: {}", reason);

    let job = &h.jobs.for_tenant(2)[0];
    assert_eq!(job.status, JobStatus::PartialFailure);
    assert_eq!(job.error_message.as_deref(), Some(reason));

    // 2 clean fetches plus 3 attempts for the failing tenant
    assert_eq!(h.client.calls(), 5);
    assert_eq!(h.store.activity_count(), 2);
    assert_eq!(h.metrics.get("jobs:JIRA_ISSUES:partial_failure"), 1);
    assert_eq!(h.metrics.get("jobs:JIRA_ISSUES:success"), 2);
}

/// Test 5: Verify that pool saturation rejects tenants without failing the batch.
///
/// With 7 eligible tenants and a pool of 5, the sync should:
/// - Run exactly 5 units
/// - Report the other 2 tenants as rejected
/// - Count each rejection and flag the batch once
#[tokio::test]
async fn test_pool_saturation_rejects_excess_tenants() {
    // Arrange
    let tenants: Vec<i64> = (1..=7).collect();
    let h = Harness::with_provider(MockConfigProvider::new(&tenants), SyncConfig::default());
    assert_eq!(h.orchestrator.pool_size(), 5);
    for t in &tenants {
        h.client.set(
            *t,
            Behavior::Records(vec![issue(&format!("PROJ-{}", t), "Task", ISSUE_CREATED)]),
        );
    }

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.total_tenants, 7);
    assert_eq!(summary.results.len(), 5);
    assert_eq!(summary.rejected, vec![6, 7]);
    assert_eq!(summary.completed(), 5);
    assert!(!summary.all_successful());

    assert_eq!(h.metrics.get("tasks_rejected"), 2);
    assert_eq!(h.metrics.get("batch_partial_rejection"), 1);
    assert!(h.jobs.for_tenant(6).is_empty(), "Rejected tenant gets no job");

    // Permits are returned once the batch is over
    let again = h.orchestrator.execute_full_sync().await;
    assert_eq!(again.results.len(), 5);
}

/// Test 6: Verify that a malformed timestamp falls back instead of failing.
#[tokio::test]
async fn test_malformed_timestamp_falls_back() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Records(vec![issue("PROJ-1", "Broken", "yesterday-ish")]),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert!(summary.all_successful());
    assert_eq!(h.store.activity_count(), 1);
    assert_eq!(h.metrics.get("parser_warning:JIRA:updated_at"), 1);
    assert_eq!(h.metrics.get("parser_warning:JIRA:created_at"), 0);
}

/// Test 7: Verify that a client rejection fails the job.
///
/// A 4xx is not transient: no fallback, no retry, the job is FAILED.
#[tokio::test]
async fn test_client_rejection_fails_job() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Fail(|| AppError::RemoteRejected {
            status: 401,
            message: "bad credentials".into(),
        }),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    let result = &summary.results[0];
    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.degraded_reason.is_none());
    assert!(result.error_message.as_deref().unwrap().contains("401"));
    assert_eq!(h.client.calls(), 1, "4xx must not be retried");

    let job = &h.jobs.for_tenant(1)[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
    assert_eq!(h.metrics.get("jobs:JIRA_ISSUES:failure"), 1);
}

/// Test 8: Verify that a tenant without a source target fails with a config error.
#[tokio::test]
async fn test_missing_target_fails_job() {
    // Arrange
    let h = Harness::with_provider(
        MockConfigProvider::new(&[1, 2]).without_jira(&[2]),
        SyncConfig::default(),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.failed(), 1);
    let failed = &summary.results[1];
    assert_eq!(failed.tenant_id, 2);
    assert!(
        failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("has no Jira configuration")
    );
    assert_eq!(h.client.calls(), 1, "No fetch for the unconfigured tenant");
}

/// Test 9: Verify that a provider outage skips the batch.
#[tokio::test]
async fn test_tenant_listing_failure_returns_empty_summary() {
    // Arrange
    let h = Harness::with_provider(MockConfigProvider::failing(), SyncConfig::default());

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.total_tenants, 0);
    assert!(summary.results.is_empty());
    assert!(summary.rejected.is_empty());
    assert!(summary.correlation_id.starts_with("SYNC-"));
    assert!(h.jobs.all().is_empty());
}

/// Test 10: Verify that every unit of a batch shares one correlation id.
///
/// The id should be visible:
/// - On every result and job record
/// - Inside the client call, through the task-local context
#[tokio::test]
async fn test_batch_shares_correlation_id() {
    // Arrange
    let h = Harness::new(&[1, 2, 3]);

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    let id = &summary.correlation_id;
    assert_eq!(id.len(), "SYNC-".len() + 8);
    assert!(summary.results.iter().all(|r| &r.correlation_id == id));
    assert!(h.jobs.all().iter().all(|j| &j.correlation_id == id));

    let mut contexts = h.client.contexts();
    contexts.sort_by_key(|c| c.tenant_id);
    assert_eq!(contexts.len(), 3);
    for (ctx, tenant_id) in contexts.iter().zip([1, 2, 3]) {
        assert_eq!(&ctx.correlation_id, id);
        assert_eq!(ctx.tenant_id, tenant_id);
        assert_eq!(ctx.job_type, JobType::JiraIssues);
    }
}

/// Test 11: Verify that a single tenant can be synced on demand.
#[tokio::test]
async fn test_sync_tenant() {
    // Arrange
    let h = Harness::new(&[1, 2]);
    h.client.set(
        2,
        Behavior::Records(vec![issue("PROJ-9", "Manual", ISSUE_CREATED)]),
    );

    // Act
    let result = h.orchestrator.sync_tenant(2).await.unwrap();

    // Assert
    assert_eq!(result.tenant_id, 2);
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.records_saved, 1);
    assert!(result.job_id.is_some());
    assert!(h.jobs.for_tenant(1).is_empty());
    assert!(h.store.activity(2, "PROJ-9").is_some());
}

/// Test 12: Verify that a panicking unit does not affect its siblings.
///
/// The panicking tenant's job was already created, so it must still end
/// FAILED with the panic text rather than stay RUNNING.
#[tokio::test]
async fn test_panicking_unit_is_isolated() {
    // Arrange
    let h = Harness::new(&[1, 2]);
    h.client.set(1, Behavior::Panic);
    h.client.set(
        2,
        Behavior::Records(vec![issue("PROJ-2", "Fine", ISSUE_CREATED)]),
    );

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(summary.results.len(), 2);
    let panicked = &summary.results[0];
    assert_eq!(panicked.status, JobStatus::Failed);
    assert!(panicked.job_id.is_some());
    let message = panicked.error_message.as_deref().unwrap();
    assert!(message.contains("scripted panic for PROJ1"), "{}", message);
    assert_eq!(summary.results[1].status, JobStatus::Completed);
    assert_eq!(h.store.activity_count(), 1);

    let jobs = h.jobs.for_tenant(1);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].error_message.as_deref(), Some(message));
    assert!(jobs[0].completed_at.is_some());
}

/// Test 13: Verify that a persistence failure fails the job.
#[tokio::test]
async fn test_store_failure_fails_job() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Records(vec![issue("PROJ-1", "Lost", ISSUE_CREATED)]),
    );
    h.store.fail_writes();

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    let result = &summary.results[0];
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.records_saved, 0);
    assert_eq!(h.jobs.for_tenant(1)[0].status, JobStatus::Failed);
}

/// Test 14: Verify that a shared open circuit degrades every tenant of a later batch.
///
/// After enough failures the breaker opens; the next batch must not call the
/// remote at all and every tenant ends PARTIAL_FAILURE.
#[tokio::test(start_paused = true)]
async fn test_open_circuit_degrades_next_batch() {
    // Arrange
    let mut config = ResilienceConfig::for_source(ActivitySource::Jira);
    config.circuit_breaker.minimum_calls = 3;
    config.circuit_breaker.sliding_window_size = 3;
    let pipeline = ResiliencePipeline::new(ActivitySource::Jira, config);
    let h = Harness::build(MockConfigProvider::new(&[1]), pipeline, SyncConfig::default());
    h.client.set(
        1,
        Behavior::Fail(|| AppError::ServerError {
            status: 503,
            message: "maintenance".into(),
        }),
    );
    h.orchestrator.execute_full_sync().await;
    let calls_after_first = h.client.calls();

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(calls_after_first, 3);
    assert_eq!(h.client.calls(), calls_after_first, "Open circuit blocks calls");
    assert_eq!(summary.partial(), 1);
    let reason = summary.results[0].degraded_reason.as_deref().unwrap();
    assert!(reason.contains("open"), "reason: {}", reason);
    assert!(h.metrics.get("circuit_open_observed") >= 1);
}

/// Test 15: Verify that the worker pool follows the bulkhead limit.
#[tokio::test]
async fn test_pool_size_follows_bulkhead() {
    // Arrange
    let tenants: Vec<i64> = (1..=4).collect();
    let mut config = ResilienceConfig::for_source(ActivitySource::Jira);
    config.rate_limiter.limit_for_period = 1000;
    config.bulkhead.max_concurrent_calls = 0;
    let pipeline = ResiliencePipeline::new(ActivitySource::Jira, config);
    let h = Harness::build(MockConfigProvider::new(&tenants), pipeline, SyncConfig::default());

    // Act
    let summary = h.orchestrator.execute_full_sync().await;

    // Assert
    assert_eq!(h.orchestrator.pool_size(), 1);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.rejected, vec![2, 3, 4]);
}

