//! Pulse Core - Domain types, resilience policies and sync orchestration.
//!
//! This crate provides the core functionality for pulse, including:
//!
//! - **Domain models**: [`UnifiedActivity`], [`JiraIssue`], [`GithubCommit`], [`SyncJob`]
//! - **Resilience**: [`ResiliencePipeline`] chaining rate limiter, retry,
//!   circuit breaker and bulkhead, with a degraded [`FetchOutcome`] as fallback
//! - **Services**: [`SyncOrchestrator`] for per-tenant fan-out, [`Scheduler`]
//!   for recurring runs
//! - **Traits**: [`ConfigProvider`], [`SourceClient`], [`ActivityStore`],
//!   [`JobStore`], [`SchedulerLock`] for dependency injection
//! - **Observability**: [`SyncMetrics`] sink and [`CorrelationContext`]
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O directly. The database lives behind
//! [`ActivityStore`] and [`JobStore`] (see `pulse-db`), remote APIs behind
//! [`SourceClient`] and [`ConfigProvider`] (see `pulse-client`).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pulse_core::{ActivitySource, ResiliencePipeline, SyncConfig, SyncOrchestrator};
//! use pulse_core::metrics::RecorderMetrics;
//!
//! let pipeline = Arc::new(ResiliencePipeline::for_source(ActivitySource::Jira));
//! let orchestrator = SyncOrchestrator::new(
//!     provider, jira_client, pipeline, activity_repo, job_repo,
//!     Arc::new(RecorderMetrics), SyncConfig::default(),
//! );
//! let summary = orchestrator.execute_full_sync().await;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod mapper;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod resilience;
pub mod scheduler;
pub mod traits;

// Configuration
pub use config::{
    DbConfig, GithubTenantEntry, HttpConfig, JiraTenantEntry, ScheduleConfig, SyncConfig,
    TenantEntry, TenantsConfig, default_tenants_path, load_tenants_config,
};

// Error handling
pub use error::AppError;

// Jobs
pub use job::{BatchSyncSummary, JobStatus, JobType, SyncJob, SyncResult};

// Domain models
pub use models::{
    ActivitySource, ActivityType, ExternalRecord, ExternalUser, GithubCommit, GithubCommitRecord,
    JiraIssue, JiraIssueRecord, MappedBatch, MappedRecord, SourceEntity, SourceTarget,
    TenantConfig, UnifiedActivity,
};

// Resilience
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FetchOutcome, PolicyError,
    PolicyRejection, ResilienceConfig, ResiliencePipeline,
};

// Services
pub use context::CorrelationContext;
pub use mapper::DataMapper;
pub use orchestrator::{
    SilentSyncReporter, SyncEvent, SyncOrchestrator, SyncReporter, TracingSyncReporter,
};
pub use persistence::{UPSERT_CHUNK_SIZE, UpsertSummary, dedup_last_wins, upsert_in_chunks};
pub use scheduler::{LockPolicy, Scheduler};

// Traits
pub use self::metrics::{NoopMetrics, RecorderMetrics, SyncMetrics};
pub use traits::{ActivityStore, ConfigProvider, JobStore, SchedulerLock, SourceClient};
