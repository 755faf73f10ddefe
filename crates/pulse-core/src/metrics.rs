//! Sync metrics.
//!
//! Components report through the [`SyncMetrics`] trait. [`RecorderMetrics`]
//! forwards to the `metrics` facade, so whatever recorder the binary
//! installs (StatsD in production) receives the values. [`NoopMetrics`]
//! discards everything.

use std::time::Duration;

use crate::job::{JobStatus, JobType};
use crate::models::ActivitySource;
use crate::resilience::CircuitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const SYNC_JOBS: MetricDef = MetricDef {
    name: "sync_jobs_total",
    metric_type: MetricType::Counter,
    description: "Sync jobs by job type and outcome (started, success, partial_failure, failure)",
};

pub const SYNC_DURATION: MetricDef = MetricDef {
    name: "sync_duration_seconds",
    metric_type: MetricType::Histogram,
    description: "Wall-clock time of one per-tenant sync unit in seconds",
};

pub const RECORDS_FETCHED: MetricDef = MetricDef {
    name: "sync_records_fetched_total",
    metric_type: MetricType::Counter,
    description: "Records returned by source fetches",
};

pub const RECORDS_SAVED: MetricDef = MetricDef {
    name: "sync_records_saved_total",
    metric_type: MetricType::Counter,
    description: "Activity rows written by upserts",
};

pub const TASKS_REJECTED: MetricDef = MetricDef {
    name: "sync_tasks_rejected_total",
    metric_type: MetricType::Counter,
    description: "Tenant units skipped because the worker pool was saturated",
};

pub const BATCH_PARTIAL_REJECTION: MetricDef = MetricDef {
    name: "sync_batch_partial_rejection_total",
    metric_type: MetricType::Counter,
    description: "Batches in which at least one tenant was rejected",
};

pub const PARSER_WARNING: MetricDef = MetricDef {
    name: "sync_parser_warning_total",
    metric_type: MetricType::Counter,
    description: "Timestamps that could not be parsed and were replaced by the current time",
};

pub const RECORDS_PARSED: MetricDef = MetricDef {
    name: "sync_records_parsed_total",
    metric_type: MetricType::Counter,
    description: "External records mapped into activities",
};

pub const CONSTRAINT_VIOLATION: MetricDef = MetricDef {
    name: "sync_constraint_violation_total",
    metric_type: MetricType::Counter,
    description: "Unique violations surfacing outside the upsert conflict path",
};

pub const POOL_ACTIVE: MetricDef = MetricDef {
    name: "sync_pool_active",
    metric_type: MetricType::Gauge,
    description: "Worker pool permits in use",
};

pub const POOL_AVAILABLE: MetricDef = MetricDef {
    name: "sync_pool_available",
    metric_type: MetricType::Gauge,
    description: "Worker pool permits free",
};

pub const BULKHEAD_AVAILABLE: MetricDef = MetricDef {
    name: "sync_bulkhead_available",
    metric_type: MetricType::Gauge,
    description: "Bulkhead permits free for a source",
};

pub const CIRCUIT_STATE: MetricDef = MetricDef {
    name: "sync_circuit_state",
    metric_type: MetricType::Gauge,
    description: "Circuit breaker state for a source (0 closed, 1 open, 2 half-open)",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SYNC_JOBS,
    SYNC_DURATION,
    RECORDS_FETCHED,
    RECORDS_SAVED,
    TASKS_REJECTED,
    BATCH_PARTIAL_REJECTION,
    PARSER_WARNING,
    RECORDS_PARSED,
    CONSTRAINT_VIOLATION,
    POOL_ACTIVE,
    POOL_AVAILABLE,
    BULKHEAD_AVAILABLE,
    CIRCUIT_STATE,
];

/// Sink for sync metrics.
///
/// Every method defaults to doing nothing, so implementations only override
/// what they care about.
pub trait SyncMetrics: Send + Sync {
    fn job_started(&self, _job_type: JobType) {}

    fn job_finished(
        &self,
        _job_type: JobType,
        _status: JobStatus,
        _duration: Duration,
        _fetched: usize,
        _saved: usize,
    ) {
    }

    fn task_rejected(&self, _job_type: JobType) {}

    fn batch_partial_rejection(&self, _job_type: JobType) {}

    fn parser_warning(&self, _source: ActivitySource, _field: &'static str) {}

    fn record_parsed(&self, _source: ActivitySource) {}

    fn constraint_violation(&self, _table: &'static str) {}

    fn pool_usage(&self, _job_type: JobType, _active: usize, _available: usize) {}

    fn bulkhead_available(&self, _source: ActivitySource, _available: usize) {}

    fn circuit_state(&self, _source: ActivitySource, _state: CircuitState) {}
}

/// Discards all metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {}

/// Reports through the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl RecorderMetrics {
    /// Registers descriptions for every metric with the installed recorder.
    pub fn describe() {
        for def in ALL_METRICS {
            match def.metric_type {
                MetricType::Counter => ::metrics::describe_counter!(def.name, def.description),
                MetricType::Gauge => ::metrics::describe_gauge!(def.name, def.description),
                MetricType::Histogram => ::metrics::describe_histogram!(def.name, def.description),
            }
        }
    }
}

impl SyncMetrics for RecorderMetrics {
    fn job_started(&self, job_type: JobType) {
        ::metrics::counter!(SYNC_JOBS.name, "job_type" => job_type.as_str(), "status" => "started")
            .increment(1);
    }

    fn job_finished(
        &self,
        job_type: JobType,
        status: JobStatus,
        duration: Duration,
        fetched: usize,
        saved: usize,
    ) {
        let job_type = job_type.as_str();
        ::metrics::counter!(SYNC_JOBS.name, "job_type" => job_type, "status" => status.metric_label())
            .increment(1);
        ::metrics::histogram!(SYNC_DURATION.name, "job_type" => job_type)
            .record(duration.as_secs_f64());
        ::metrics::counter!(RECORDS_FETCHED.name, "job_type" => job_type).increment(fetched as u64);
        ::metrics::counter!(RECORDS_SAVED.name, "job_type" => job_type).increment(saved as u64);
    }

    fn task_rejected(&self, job_type: JobType) {
        ::metrics::counter!(TASKS_REJECTED.name, "job_type" => job_type.as_str()).increment(1);
    }

    fn batch_partial_rejection(&self, job_type: JobType) {
        ::metrics::counter!(BATCH_PARTIAL_REJECTION.name, "job_type" => job_type.as_str())
            .increment(1);
    }

    fn parser_warning(&self, source: ActivitySource, field: &'static str) {
        ::metrics::counter!(PARSER_WARNING.name, "source" => source.as_str(), "field" => field)
            .increment(1);
    }

    fn record_parsed(&self, source: ActivitySource) {
        ::metrics::counter!(RECORDS_PARSED.name, "source" => source.as_str()).increment(1);
    }

    fn constraint_violation(&self, table: &'static str) {
        ::metrics::counter!(CONSTRAINT_VIOLATION.name, "table" => table).increment(1);
    }

    fn pool_usage(&self, job_type: JobType, active: usize, available: usize) {
        let job_type = job_type.as_str();
        ::metrics::gauge!(POOL_ACTIVE.name, "job_type" => job_type).set(active as f64);
        ::metrics::gauge!(POOL_AVAILABLE.name, "job_type" => job_type).set(available as f64);
    }

    fn bulkhead_available(&self, source: ActivitySource, available: usize) {
        ::metrics::gauge!(BULKHEAD_AVAILABLE.name, "source" => source.as_str())
            .set(available as f64);
    }

    fn circuit_state(&self, source: ActivitySource, state: CircuitState) {
        ::metrics::gauge!(CIRCUIT_STATE.name, "source" => source.as_str()).set(state.as_gauge());
    }
}
