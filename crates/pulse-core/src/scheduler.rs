//! Recurring full syncs.
//!
//! Each registered orchestrator runs on its own fixed interval until the
//! cancellation token fires. Runs of the same orchestrator never overlap: a
//! tick that arrives while a batch is still running is skipped.
//!
//! Every run first takes a named [`SchedulerLock`], so when several replicas
//! run the scheduler only one of them syncs a given source per tick.
//!
//! # Example
//!
//! ```ignore
//! use pulse_core::scheduler::Scheduler;
//! use pulse_core::orchestrator::TracingSyncReporter;
//! use tokio_util::sync::CancellationToken;
//!
//! let scheduler = Scheduler::new(lock_repo)
//!     .with_sync(jira_orchestrator, Duration::from_secs(30 * 60))
//!     .with_sync(github_orchestrator, Duration::from_secs(15 * 60));
//!
//! scheduler.run(CancellationToken::new(), TracingSyncReporter).await;
//! ```

use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::job::JobType;
use crate::orchestrator::{SyncEvent, SyncOrchestrator, SyncReporter};
use crate::traits::{ActivityStore, ConfigProvider, JobStore, SchedulerLock, SourceClient};

/// Lock settings for one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub name: String,
    /// Expiry of a lock whose holder never released it.
    pub lock_at_most_for: Duration,
    /// Minimum time a lock stays held, even after a fast run.
    pub lock_at_least_for: Duration,
}

impl LockPolicy {
    /// Jira holds its lock for at most 25 minutes and at least one; GitHub
    /// for at most 13 minutes and at least 30 seconds.
    pub fn for_job(job_type: JobType) -> Self {
        let (lock_at_most_for, lock_at_least_for) = match job_type {
            JobType::JiraIssues => (Duration::from_secs(25 * 60), Duration::from_secs(60)),
            JobType::GithubCommits => (Duration::from_secs(13 * 60), Duration::from_secs(30)),
            _ => (Duration::from_secs(10 * 60), Duration::ZERO),
        };
        Self {
            name: format!("sync_{}", job_type.as_str().to_lowercase()),
            lock_at_most_for,
            lock_at_least_for,
        }
    }
}

struct ScheduledSync<P, C, S, J>
where
    P: ConfigProvider,
    C: SourceClient,
    S: ActivityStore,
    J: JobStore,
{
    orchestrator: SyncOrchestrator<P, C, S, J>,
    interval: Duration,
    lock: LockPolicy,
}

/// Runs orchestrators on fixed intervals.
pub struct Scheduler<P, C, S, J, L>
where
    P: ConfigProvider,
    C: SourceClient,
    S: ActivityStore,
    J: JobStore,
    L: SchedulerLock,
{
    lock: L,
    entries: Vec<ScheduledSync<P, C, S, J>>,
}

impl<P, C, S, J, L> Scheduler<P, C, S, J, L>
where
    P: ConfigProvider + 'static,
    C: SourceClient + 'static,
    S: ActivityStore + 'static,
    J: JobStore + 'static,
    L: SchedulerLock + 'static,
{
    pub fn new(lock: L) -> Self {
        Self {
            lock,
            entries: Vec::new(),
        }
    }

    /// Registers `orchestrator` to run every `interval`.
    pub fn with_sync(self, orchestrator: SyncOrchestrator<P, C, S, J>, interval: Duration) -> Self {
        let policy = LockPolicy::for_job(orchestrator.job_type());
        self.with_sync_locked(orchestrator, interval, policy)
    }

    /// Registers `orchestrator` with an explicit lock policy.
    ///
    /// `lock_at_least_for` is capped at half the interval so the minimum hold
    /// can never swallow the next tick.
    pub fn with_sync_locked(
        mut self,
        orchestrator: SyncOrchestrator<P, C, S, J>,
        interval: Duration,
        mut lock: LockPolicy,
    ) -> Self {
        lock.lock_at_least_for = lock.lock_at_least_for.min(interval / 2);
        self.entries.push(ScheduledSync {
            orchestrator,
            interval,
            lock,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs until `cancel_token` fires.
    ///
    /// The first run of each entry happens one interval after start. A batch
    /// in progress when the token fires is allowed to finish.
    pub async fn run<R>(self, cancel_token: CancellationToken, reporter: R)
    where
        R: SyncReporter + Clone + 'static,
    {
        let mut loops = JoinSet::new();

        for entry in self.entries {
            reporter.report(SyncEvent::ScheduleRegistered {
                job_type: entry.orchestrator.job_type(),
                interval_secs: entry.interval.as_secs(),
            });

            let cancel = cancel_token.clone();
            let reporter = reporter.clone();
            let lock = self.lock.clone();
            loops.spawn(async move {
                let start = tokio::time::Instant::now() + entry.interval;
                let mut ticker = interval_at(start, entry.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    run_locked(&entry, &lock, &reporter).await;

                    // A tick that came due while the batch ran is dropped;
                    // the next run waits for the following slot.
                    if ticker.tick().now_or_never().is_some() {
                        reporter.report(SyncEvent::ScheduledRunSkipped {
                            job_type: entry.orchestrator.job_type(),
                            reason: "previous run still in progress",
                        });
                    }
                }
            });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scheduled sync loop terminated abnormally");
            }
        }

        reporter.report(SyncEvent::SchedulerStopped);
    }
}

async fn run_locked<P, C, S, J, L, R>(entry: &ScheduledSync<P, C, S, J>, lock: &L, reporter: &R)
where
    P: ConfigProvider + 'static,
    C: SourceClient + 'static,
    S: ActivityStore + 'static,
    J: JobStore + 'static,
    L: SchedulerLock,
    R: SyncReporter,
{
    let job_type = entry.orchestrator.job_type();
    let policy = &entry.lock;

    match lock.try_lock(&policy.name, policy.lock_at_most_for).await {
        Ok(true) => {
            debug!(lock = %policy.name, "Scheduler lock acquired");
        }
        Ok(false) => {
            reporter.report(SyncEvent::ScheduledRunSkipped {
                job_type,
                reason: "lock held by another scheduler",
            });
            return;
        }
        Err(e) => {
            error!(lock = %policy.name, error = %e, "Could not take scheduler lock");
            reporter.report(SyncEvent::ScheduledRunSkipped {
                job_type,
                reason: "lock unavailable",
            });
            return;
        }
    }

    entry
        .orchestrator
        .execute_full_sync_with_reporter(reporter)
        .await;

    if let Err(e) = lock.unlock(&policy.name, policy.lock_at_least_for).await {
        warn!(
            lock = %policy.name,
            error = %e,
            "Could not release scheduler lock, it expires on its own"
        );
    }
}
