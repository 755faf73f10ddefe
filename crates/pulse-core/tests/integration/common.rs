//! Test utilities and mock implementations for integration tests.
//!
//! Provides in-memory implementations of the core traits that follow the
//! same rules as the PostgreSQL ones: upserts keep the first `created_at`
//! of a natural key, and terminal job writes only apply to RUNNING jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::job::{JobStatus, JobType, SyncJob};
use pulse_core::metrics::SyncMetrics;
use pulse_core::traits::{ActivityStore, ConfigProvider, JobStore, SchedulerLock, SourceClient};
use pulse_core::{
    ActivitySource, AppError, CircuitState, CorrelationContext, ExternalRecord, GithubCommit,
    JiraIssue, JiraIssueRecord, ResilienceConfig, ResiliencePipeline, SourceTarget, SyncConfig,
    SyncEvent, SyncOrchestrator, SyncReporter, TenantConfig, UnifiedActivity,
};
use uuid::Uuid;

// =============================================================================
// MockConfigProvider
// =============================================================================

/// Config provider serving a Jira target per tenant.
///
/// The target identifier is `PROJ{tenant_id}`, which lets [`MockSourceClient`]
/// script behavior per tenant.
#[derive(Clone)]
pub struct MockConfigProvider {
    tenants: Arc<Vec<i64>>,
    without_jira: Arc<Vec<i64>>,
    fail_listing: bool,
}

impl MockConfigProvider {
    pub fn new(tenants: &[i64]) -> Self {
        Self {
            tenants: Arc::new(tenants.to_vec()),
            without_jira: Arc::new(Vec::new()),
            fail_listing: false,
        }
    }

    /// Tenants in `ids` are eligible but have no Jira configuration.
    pub fn without_jira(mut self, ids: &[i64]) -> Self {
        self.without_jira = Arc::new(ids.to_vec());
        self
    }

    pub fn failing() -> Self {
        Self {
            tenants: Arc::new(Vec::new()),
            without_jira: Arc::new(Vec::new()),
            fail_listing: true,
        }
    }
}

pub fn jira_target(tenant_id: i64) -> SourceTarget {
    SourceTarget {
        host_url: "https://acme.atlassian.net".to_string(),
        api_token: format!("token-{}", tenant_id),
        identifier: format!("PROJ{}", tenant_id),
    }
}

impl ConfigProvider for MockConfigProvider {
    async fn list_eligible_tenant_ids(&self) -> Result<Vec<i64>, AppError> {
        if self.fail_listing {
            return Err(AppError::NetworkError("config service unreachable".into()));
        }
        Ok(self.tenants.to_vec())
    }

    async fn get_decrypted_config(&self, tenant_id: i64) -> Result<TenantConfig, AppError> {
        if !self.tenants.contains(&tenant_id) {
            return Err(AppError::ConfigNotFound(tenant_id));
        }
        let jira = if self.without_jira.contains(&tenant_id) {
            None
        } else {
            Some(jira_target(tenant_id))
        };
        Ok(TenantConfig {
            tenant_id,
            jira,
            github: None,
        })
    }
}

// =============================================================================
// MockSourceClient
// =============================================================================

/// Scripted response for one target.
#[derive(Clone)]
pub enum Behavior {
    Records(Vec<ExternalRecord>),
    Fail(fn() -> AppError),
    Panic,
    /// Returns the records after sleeping, on the tokio clock.
    Slow(Duration, Vec<ExternalRecord>),
}

/// Jira-flavored source client with per-target scripted behavior.
///
/// Targets without a script return no records.
#[derive(Clone, Default)]
pub struct MockSourceClient {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    calls: Arc<AtomicUsize>,
    contexts: Arc<Mutex<Vec<CorrelationContext>>>,
}

impl MockSourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: i64, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(jira_target(tenant_id).identifier, behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Correlation contexts observed inside `fetch`, in call order.
    pub fn contexts(&self) -> Vec<CorrelationContext> {
        self.contexts.lock().unwrap().clone()
    }
}

impl SourceClient for MockSourceClient {
    fn source(&self) -> ActivitySource {
        ActivitySource::Jira
    }

    fn job_type(&self) -> JobType {
        JobType::JiraIssues
    }

    async fn fetch(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<ExternalRecord>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ctx) = CorrelationContext::current() {
            self.contexts.lock().unwrap().push(ctx);
        }
        let behavior = self.behaviors.lock().unwrap().get(&target.identifier).cloned();
        match behavior {
            None => Ok(Vec::new()),
            Some(Behavior::Records(records)) => Ok(records.into_iter().take(page_size).collect()),
            Some(Behavior::Fail(make)) => Err(make()),
            Some(Behavior::Panic) => panic!("scripted panic for {}", target.identifier),
            Some(Behavior::Slow(delay, records)) => {
                tokio::time::sleep(delay).await;
                Ok(records.into_iter().take(page_size).collect())
            }
        }
    }

    fn describe_target(&self, target: &SourceTarget) -> String {
        format!("project={}, host={}", target.identifier, target.host_url)
    }
}

/// Builds a Jira issue record.
pub fn issue(key: &str, summary: &str, updated: &str) -> ExternalRecord {
    ExternalRecord::JiraIssue(JiraIssueRecord {
        id: format!("id-{}", key),
        key: key.to_string(),
        summary: Some(summary.to_string()),
        issue_type: Some("Task".to_string()),
        status: Some("To Do".to_string()),
        created: Some("2024-01-15T10:30:00.000+0000".to_string()),
        updated: Some(updated.to_string()),
        ..Default::default()
    })
}

// =============================================================================
// MockActivityStore
// =============================================================================

/// In-memory activity store keyed on natural keys.
#[derive(Clone, Default)]
pub struct MockActivityStore {
    activities: Arc<Mutex<HashMap<(i64, ActivitySource, String), UnifiedActivity>>>,
    issues: Arc<Mutex<HashMap<(i64, String), JiraIssue>>>,
    commits: Arc<Mutex<HashMap<(i64, String), GithubCommit>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn activity_count(&self) -> usize {
        self.activities.lock().unwrap().len()
    }

    pub fn activity(&self, tenant_id: i64, external_id: &str) -> Option<UnifiedActivity> {
        self.activities
            .lock()
            .unwrap()
            .get(&(tenant_id, ActivitySource::Jira, external_id.to_string()))
            .cloned()
    }

    pub fn issue(&self, tenant_id: i64, key: &str) -> Option<JiraIssue> {
        self.issues
            .lock()
            .unwrap()
            .get(&(tenant_id, key.to_string()))
            .cloned()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.lock().unwrap().len()
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Generic("database unavailable".into()));
        }
        Ok(())
    }
}

impl ActivityStore for MockActivityStore {
    async fn upsert_activities(&self, activities: &[UnifiedActivity]) -> Result<u64, AppError> {
        self.check_writable()?;
        let mut map = self.activities.lock().unwrap();
        for a in activities {
            let key = (a.tenant_id, a.source, a.external_id.clone());
            let mut row = a.clone();
            if let Some(existing) = map.get(&key) {
                row.created_at = existing.created_at;
            }
            map.insert(key, row);
        }
        Ok(activities.len() as u64)
    }

    async fn upsert_jira_issues(&self, issues: &[JiraIssue]) -> Result<u64, AppError> {
        self.check_writable()?;
        let mut map = self.issues.lock().unwrap();
        for i in issues {
            let key = (i.tenant_id, i.issue_key.clone());
            let mut row = i.clone();
            if let Some(existing) = map.get(&key) {
                row.created_at = existing.created_at;
            }
            map.insert(key, row);
        }
        Ok(issues.len() as u64)
    }

    async fn upsert_github_commits(&self, commits: &[GithubCommit]) -> Result<u64, AppError> {
        self.check_writable()?;
        let mut map = self.commits.lock().unwrap();
        for c in commits {
            map.insert((c.tenant_id, c.commit_sha.clone()), c.clone());
        }
        Ok(commits.len() as u64)
    }
}

// =============================================================================
// MockJobStore
// =============================================================================

/// In-memory job store.
#[derive(Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, SyncJob>>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<_> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| (j.tenant_id, j.started_at));
        jobs
    }

    pub fn for_tenant(&self, tenant_id: i64) -> Vec<SyncJob> {
        self.all()
            .into_iter()
            .filter(|j| j.tenant_id == tenant_id)
            .collect()
    }

    fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        fetched: usize,
        saved: usize,
        message: Option<&str>,
    ) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                job.status = status;
                job.records_fetched = fetched as i32;
                job.records_saved = saved as i32;
                job.error_message = message.map(str::to_string);
                job.completed_at = Some(Utc::now());
            }
        }
    }
}

impl JobStore for MockJobStore {
    async fn create_job(
        &self,
        tenant_id: i64,
        job_type: JobType,
        correlation_id: &str,
    ) -> Result<SyncJob, AppError> {
        let job = SyncJob {
            id: Uuid::new_v4(),
            tenant_id,
            job_type,
            status: JobStatus::Running,
            correlation_id: correlation_id.to_string(),
            records_fetched: 0,
            records_saved: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn complete_job(&self, job_id: Uuid, fetched: usize, saved: usize) -> Result<(), AppError> {
        self.finish(job_id, JobStatus::Completed, fetched, saved, None);
        Ok(())
    }

    async fn mark_partial_failure(
        &self,
        job_id: Uuid,
        fetched: usize,
        saved: usize,
        reason: &str,
    ) -> Result<(), AppError> {
        self.finish(job_id, JobStatus::PartialFailure, fetched, saved, Some(reason));
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        self.finish(job_id, JobStatus::Failed, 0, 0, Some(error));
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SyncJob>, AppError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn list_recent_jobs(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncJob>, AppError> {
        let mut jobs: Vec<_> = self
            .all()
            .into_iter()
            .filter(|j| j.started_at >= since)
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn count_recent_failures(&self, since: DateTime<Utc>) -> Result<i64, AppError> {
        Ok(self
            .all()
            .iter()
            .filter(|j| j.started_at >= since && j.status == JobStatus::Failed)
            .count() as i64)
    }

    async fn last_successful_sync(
        &self,
        tenant_id: i64,
        job_type: JobType,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .all()
            .iter()
            .filter(|j| {
                j.tenant_id == tenant_id
                    && j.job_type == job_type
                    && j.status == JobStatus::Completed
            })
            .filter_map(|j| j.completed_at)
            .max())
    }
}

// =============================================================================
// CountingMetrics
// =============================================================================

/// Metrics sink that counts events by name.
#[derive(Default)]
pub struct CountingMetrics {
    counts: Mutex<HashMap<String, u64>>,
}

impl CountingMetrics {
    pub fn get(&self, name: &str) -> u64 {
        self.counts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn bump(&self, name: String, by: u64) {
        *self.counts.lock().unwrap().entry(name).or_insert(0) += by;
    }
}

impl SyncMetrics for CountingMetrics {
    fn job_started(&self, job_type: JobType) {
        self.bump(format!("jobs:{}:started", job_type), 1);
    }

    fn job_finished(
        &self,
        job_type: JobType,
        status: JobStatus,
        _duration: Duration,
        fetched: usize,
        saved: usize,
    ) {
        self.bump(format!("jobs:{}:{}", job_type, status.metric_label()), 1);
        self.bump("records_fetched".into(), fetched as u64);
        self.bump("records_saved".into(), saved as u64);
    }

    fn task_rejected(&self, _job_type: JobType) {
        self.bump("tasks_rejected".into(), 1);
    }

    fn batch_partial_rejection(&self, _job_type: JobType) {
        self.bump("batch_partial_rejection".into(), 1);
    }

    fn parser_warning(&self, source: ActivitySource, field: &'static str) {
        self.bump(format!("parser_warning:{}:{}", source, field), 1);
    }

    fn record_parsed(&self, _source: ActivitySource) {
        self.bump("records_parsed".into(), 1);
    }

    fn circuit_state(&self, _source: ActivitySource, state: CircuitState) {
        if state == CircuitState::Open {
            self.bump("circuit_open_observed".into(), 1);
        }
    }
}

// =============================================================================
// MockSchedulerLock
// =============================================================================

/// In-memory scheduler lock.
///
/// Names passed to [`MockSchedulerLock::hold_elsewhere`] behave as if another
/// replica holds them.
#[derive(Clone, Default)]
pub struct MockSchedulerLock {
    held: Arc<Mutex<HashMap<String, bool>>>,
    acquisitions: Arc<Mutex<Vec<String>>>,
    releases: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl MockSchedulerLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_elsewhere(&self, name: &str) {
        self.held.lock().unwrap().insert(name.to_string(), true);
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().unwrap().get(name).copied().unwrap_or(false)
    }

    pub fn acquisitions(&self) -> Vec<String> {
        self.acquisitions.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<(String, Duration)> {
        self.releases.lock().unwrap().clone()
    }
}

impl SchedulerLock for MockSchedulerLock {
    async fn try_lock(&self, name: &str, _lock_at_most_for: Duration) -> Result<bool, AppError> {
        let mut held = self.held.lock().unwrap();
        if held.get(name).copied().unwrap_or(false) {
            return Ok(false);
        }
        held.insert(name.to_string(), true);
        self.acquisitions.lock().unwrap().push(name.to_string());
        Ok(true)
    }

    async fn unlock(&self, name: &str, lock_at_least_for: Duration) -> Result<(), AppError> {
        self.held.lock().unwrap().insert(name.to_string(), false);
        self.releases
            .lock()
            .unwrap()
            .push((name.to_string(), lock_at_least_for));
        Ok(())
    }
}

// =============================================================================
// RecordingReporter
// =============================================================================

/// Reporter keeping a short label per scheduler-level event.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == label).count()
    }
}

impl SyncReporter for RecordingReporter {
    fn report(&self, event: SyncEvent<'_>) {
        let label = match event {
            SyncEvent::BatchFinished { .. } => "batch_finished".to_string(),
            SyncEvent::ScheduleRegistered { .. } => "registered".to_string(),
            SyncEvent::ScheduledRunSkipped { reason, .. } => format!("skipped: {}", reason),
            SyncEvent::SchedulerStopped => "stopped".to_string(),
            _ => return,
        };
        self.events.lock().unwrap().push(label);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Jira pipeline whose breaker and rate limiter never trip within a test,
/// so one failing tenant cannot degrade its siblings through shared state.
pub fn tolerant_pipeline() -> ResiliencePipeline {
    let mut config = ResilienceConfig::for_source(ActivitySource::Jira);
    config.rate_limiter.limit_for_period = 1000;
    config.circuit_breaker.minimum_calls = 100;
    config.circuit_breaker.sliding_window_size = 100;
    ResiliencePipeline::new(ActivitySource::Jira, config)
}

pub type TestOrchestrator =
    SyncOrchestrator<MockConfigProvider, MockSourceClient, MockActivityStore, MockJobStore>;

/// Everything a test needs to drive and inspect one orchestrator.
pub struct Harness {
    pub client: MockSourceClient,
    pub store: MockActivityStore,
    pub jobs: MockJobStore,
    pub metrics: Arc<CountingMetrics>,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub fn new(tenants: &[i64]) -> Self {
        Self::with_provider(MockConfigProvider::new(tenants), SyncConfig::default())
    }

    pub fn with_provider(provider: MockConfigProvider, config: SyncConfig) -> Self {
        Self::build(provider, tolerant_pipeline(), config)
    }

    pub fn build(
        provider: MockConfigProvider,
        pipeline: ResiliencePipeline,
        config: SyncConfig,
    ) -> Self {
        let client = MockSourceClient::new();
        let store = MockActivityStore::new();
        let jobs = MockJobStore::new();
        let metrics = Arc::new(CountingMetrics::default());
        let pipeline = Arc::new(pipeline);

        let orchestrator = SyncOrchestrator::new(
            provider,
            client.clone(),
            pipeline,
            store.clone(),
            jobs.clone(),
            metrics.clone(),
            config,
        );

        Self {
            client,
            store,
            jobs,
            metrics,
            orchestrator,
        }
    }
}
