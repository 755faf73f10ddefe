//! Integration tests for Scheduler.
//!
//! Time is paused, so intervals of several minutes elapse instantly and the
//! tick count is exact.

use std::time::Duration;

use pulse_core::job::JobStatus;
use pulse_core::{LockPolicy, Scheduler};
use tokio_util::sync::CancellationToken;

use crate::integration::common::{
    Behavior, Harness, MockSchedulerLock, RecordingReporter, TestOrchestrator, issue,
};

const MINUTE: Duration = Duration::from_secs(60);
const JIRA_LOCK: &str = "sync_jira_issues";

/// Runs `orchestrator` every 10 minutes for `run_for`, then cancels.
async fn run_scheduler(
    orchestrator: TestOrchestrator,
    lock: MockSchedulerLock,
    reporter: RecordingReporter,
    run_for: Duration,
) {
    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(lock).with_sync(orchestrator, 10 * MINUTE);
    let handle = tokio::spawn(scheduler.run(cancel.clone(), reporter));

    tokio::time::sleep(run_for).await;
    cancel.cancel();
    handle.await.unwrap();
}

/// Test 1: Verify that each interval tick runs one batch and that
/// cancellation stops the loop.
#[tokio::test(start_paused = true)]
async fn test_ticks_run_batches_until_cancelled() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Records(vec![issue("PROJ-1", "Task", "2024-01-15T10:30:00.000+0000")]),
    );
    let lock = MockSchedulerLock::new();
    let reporter = RecordingReporter::default();

    // Act: ticks at 10 and 20 minutes
    run_scheduler(h.orchestrator.clone(), lock.clone(), reporter.clone(), 25 * MINUTE).await;

    // Assert
    let jobs = h.jobs.for_tenant(1);
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert_eq!(reporter.count("batch_finished"), 2);
    assert_eq!(reporter.events().first().map(String::as_str), Some("registered"));
    assert_eq!(reporter.events().last().map(String::as_str), Some("stopped"));
}

/// Test 2: Verify that no batch starts once the token is cancelled.
#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_tick_runs_nothing() {
    let h = Harness::new(&[1]);
    let reporter = RecordingReporter::default();

    run_scheduler(
        h.orchestrator.clone(),
        MockSchedulerLock::new(),
        reporter.clone(),
        5 * MINUTE,
    )
    .await;

    assert!(h.jobs.all().is_empty());
    assert_eq!(reporter.events(), vec!["registered", "stopped"]);
}

/// Test 3: Verify that a tick arriving during a running batch is skipped.
///
/// Each batch takes 15 minutes on a 10 minute interval. Runs start at 10
/// and 30; the ticks at 20 and 40 fall inside a batch and are dropped.
#[tokio::test(start_paused = true)]
async fn test_tick_during_running_batch_is_skipped() {
    // Arrange
    let h = Harness::new(&[1]);
    h.client.set(
        1,
        Behavior::Slow(
            15 * MINUTE,
            vec![issue("PROJ-1", "Slow", "2024-01-15T10:30:00.000+0000")],
        ),
    );
    let reporter = RecordingReporter::default();

    // Act: cancel at 41 minutes, while the second batch is still running
    run_scheduler(
        h.orchestrator.clone(),
        MockSchedulerLock::new(),
        reporter.clone(),
        41 * MINUTE,
    )
    .await;

    // Assert
    assert_eq!(h.jobs.for_tenant(1).len(), 2);
    assert_eq!(reporter.count("batch_finished"), 2);
    assert_eq!(reporter.count("skipped: previous run still in progress"), 2);
    assert_eq!(reporter.events().last().map(String::as_str), Some("stopped"));
}

/// Test 4: Verify that a run is skipped while another replica holds the lock.
#[tokio::test(start_paused = true)]
async fn test_lock_held_elsewhere_skips_run() {
    // Arrange
    let h = Harness::new(&[1]);
    let lock = MockSchedulerLock::new();
    lock.hold_elsewhere(JIRA_LOCK);
    let reporter = RecordingReporter::default();

    // Act
    run_scheduler(h.orchestrator.clone(), lock.clone(), reporter.clone(), 25 * MINUTE).await;

    // Assert
    assert!(h.jobs.all().is_empty());
    assert_eq!(h.client.calls(), 0);
    assert_eq!(reporter.count("skipped: lock held by another scheduler"), 2);
    assert!(lock.acquisitions().is_empty());
}

/// Test 5: Verify that every run takes and releases the job's lock.
#[tokio::test(start_paused = true)]
async fn test_each_run_takes_and_releases_lock() {
    // Arrange
    let h = Harness::new(&[1]);
    let lock = MockSchedulerLock::new();

    // Act
    run_scheduler(
        h.orchestrator.clone(),
        lock.clone(),
        RecordingReporter::default(),
        25 * MINUTE,
    )
    .await;

    // Assert
    let policy = LockPolicy::for_job(h.orchestrator.job_type());
    assert_eq!(lock.acquisitions(), vec![JIRA_LOCK, JIRA_LOCK]);
    assert_eq!(
        lock.releases(),
        vec![
            (JIRA_LOCK.to_string(), policy.lock_at_least_for),
            (JIRA_LOCK.to_string(), policy.lock_at_least_for),
        ]
    );
    assert!(!lock.is_held(JIRA_LOCK));
}
