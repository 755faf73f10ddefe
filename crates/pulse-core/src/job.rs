//! Sync job types for lifecycle tracking.
//!
//! Every per-tenant unit of work owns exactly one [`SyncJob`] record.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌──> COMPLETED        (fetch ok, nothing degraded)
//! RUNNING ───┼──> PARTIAL_FAILURE  (fallback taken, reason attached)
//!            └──> FAILED           (4xx, config problem, persistence error)
//! ```
//!
//! A job is created RUNNING and written to a terminal status exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ActivitySource;

// =============================================================================
// Job Type
// =============================================================================

/// Kind of sync a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    JiraIssues,
    JiraSprints,
    GithubCommits,
    GithubPrs,
}

impl JobType {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::JiraIssues => "JIRA_ISSUES",
            JobType::JiraSprints => "JIRA_SPRINTS",
            JobType::GithubCommits => "GITHUB_COMMITS",
            JobType::GithubPrs => "GITHUB_PRS",
        }
    }

    /// Returns the external source this job type reads from.
    pub fn source(&self) -> ActivitySource {
        match self {
            JobType::JiraIssues | JobType::JiraSprints => ActivitySource::Jira,
            JobType::GithubCommits | JobType::GithubPrs => ActivitySource::Github,
        }
    }
}

/// Error type for parsing [`JobType`] or [`JobStatus`] from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobError(String);

impl std::fmt::Display for ParseJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job value: {}", self.0)
    }
}

impl std::error::Error for ParseJobError {}

impl std::str::FromStr for JobType {
    type Err = ParseJobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JIRA_ISSUES" => Ok(JobType::JiraIssues),
            "JIRA_SPRINTS" => Ok(JobType::JiraSprints),
            "GITHUB_COMMITS" => Ok(JobType::GithubCommits),
            "GITHUB_PRS" => Ok(JobType::GithubPrs),
            _ => Err(ParseJobError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Job Status
// =============================================================================

/// Status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Unit of work is in flight.
    Running,
    /// Fetched and persisted without degradation.
    Completed,
    /// A fallback was taken; whatever was fetched before it is persisted.
    PartialFailure,
    /// Unhandled fault (remote rejection, config, persistence).
    Failed,
}

impl JobStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::PartialFailure => "PARTIAL_FAILURE",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Label used for the `status` dimension of job outcome metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            JobStatus::Running => "started",
            JobStatus::Completed => "success",
            JobStatus::PartialFailure => "partial_failure",
            JobStatus::Failed => "failure",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ParseJobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "PARTIAL_FAILURE" => Ok(JobStatus::PartialFailure),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(ParseJobError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Sync Job
// =============================================================================

/// A persisted sync job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub tenant_id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Batch correlation id, shared by all jobs of one orchestration run.
    pub correlation_id: String,
    pub records_fetched: i32,
    pub records_saved: i32,
    /// Failure message or degradation reason.
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Wall-clock duration of the job, once it has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one per-tenant unit, returned to the caller of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// `None` when the unit failed before the job record could be created.
    pub job_id: Option<Uuid>,
    pub tenant_id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub degraded_reason: Option<String>,
    pub records_fetched: usize,
    pub records_saved: usize,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub correlation_id: String,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }
}

/// Aggregated outcome of one orchestration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSyncSummary {
    pub correlation_id: String,
    /// Tenants that were eligible for the run.
    pub total_tenants: usize,
    /// Tenants skipped because the worker pool was saturated.
    pub rejected: Vec<i64>,
    pub results: Vec<SyncResult>,
}

impl BatchSyncSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    pub fn partial(&self) -> usize {
        self.count(JobStatus::PartialFailure)
    }

    pub fn failed(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    pub fn total_records_saved(&self) -> usize {
        self.results.iter().map(|r| r.records_saved).sum()
    }

    /// Returns true if every eligible tenant completed cleanly.
    pub fn all_successful(&self) -> bool {
        self.rejected.is_empty() && self.results.iter().all(SyncResult::is_success)
    }
}
