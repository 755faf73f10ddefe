//! Integration tests for JobRepository.
//!
//! These tests verify the sync job lifecycle and history queries against a
//! real PostgreSQL database.

use chrono::{Duration, Utc};
use pulse_core::job::{JobStatus, JobType};
use pulse_core::traits::JobStore;
use pulse_db::JobRepository;

use crate::integration::common::setup_test_db;

/// Test 1: Verify that a job is created RUNNING and completes once
#[tokio::test]
async fn test_job_lifecycle_completed() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    let job = repo
        .create_job(1, JobType::JiraIssues, "SYNC-0001abcd")
        .await
        .expect("create_job should succeed");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.correlation_id, "SYNC-0001abcd");
    assert!(job.completed_at.is_none());

    repo.complete_job(job.id, 12, 12).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().expect("job should exist");
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.records_fetched, 12);
    assert_eq!(stored.records_saved, 12);
    assert!(stored.error_message.is_none());
    assert!(stored.duration_ms().is_some());
}

/// Test 2: Verify that a terminal job is never written again
#[tokio::test]
async fn test_terminal_status_is_final() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    let job = repo
        .create_job(1, JobType::GithubCommits, "SYNC-0002abcd")
        .await
        .unwrap();
    repo.mark_partial_failure(job.id, 0, 0, "GitHub API unavailable")
        .await
        .unwrap();

    // Late writes are ignored, not errors
    repo.complete_job(job.id, 5, 5).await.unwrap();
    repo.fail_job(job.id, "late failure").await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::PartialFailure);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("GitHub API unavailable")
    );
    assert_eq!(stored.records_saved, 0);
}

/// Test 3: Verify the history queries
#[tokio::test]
async fn test_recent_jobs_and_failures() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);
    let since = Utc::now() - Duration::hours(1);

    let ok = repo
        .create_job(1, JobType::JiraIssues, "SYNC-0003abcd")
        .await
        .unwrap();
    repo.complete_job(ok.id, 1, 1).await.unwrap();

    let bad = repo
        .create_job(2, JobType::JiraIssues, "SYNC-0003abcd")
        .await
        .unwrap();
    repo.fail_job(bad.id, "Remote rejected request (HTTP 401)")
        .await
        .unwrap();

    let running = repo
        .create_job(3, JobType::JiraIssues, "SYNC-0003abcd")
        .await
        .unwrap();

    let recent = repo.list_recent_jobs(since, 10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].id, running.id, "newest first");

    let limited = repo.list_recent_jobs(since, 2).await.unwrap();
    assert_eq!(limited.len(), 2);

    let future = Utc::now() + Duration::hours(1);
    assert!(repo.list_recent_jobs(future, 10).await.unwrap().is_empty());

    assert_eq!(repo.count_recent_failures(since).await.unwrap(), 1);
}

/// Test 4: Verify that last_successful_sync only sees COMPLETED jobs
#[tokio::test]
async fn test_last_successful_sync() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    assert!(
        repo.last_successful_sync(1, JobType::JiraIssues)
            .await
            .unwrap()
            .is_none()
    );

    let done = repo
        .create_job(1, JobType::JiraIssues, "SYNC-0004abcd")
        .await
        .unwrap();
    repo.complete_job(done.id, 3, 3).await.unwrap();

    let degraded = repo
        .create_job(1, JobType::JiraIssues, "SYNC-0005abcd")
        .await
        .unwrap();
    repo.mark_partial_failure(degraded.id, 0, 0, "Jira API unavailable")
        .await
        .unwrap();

    let completed_at = repo.get_job(done.id).await.unwrap().unwrap().completed_at;
    let last = repo
        .last_successful_sync(1, JobType::JiraIssues)
        .await
        .unwrap();
    assert_eq!(last, completed_at);

    assert!(
        repo.last_successful_sync(1, JobType::GithubCommits)
            .await
            .unwrap()
            .is_none()
    );
}
