mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::Parser;
use dotenvy::dotenv;
use metrics_exporter_statsd::StatsdBuilder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_client::{FileConfigProvider, SourceClientEnum};
use pulse_core::{
    ActivitySource, AppError, BatchSyncSummary, DbConfig, HttpConfig, JobStore, RecorderMetrics,
    ResilienceConfig, ResiliencePipeline, ScheduleConfig, Scheduler, SyncConfig, SyncMetrics,
    SyncOrchestrator, SyncResult, TracingSyncReporter,
};
use pulse_db::{ActivityRepository, JobRepository, LockRepository, ensure_schema};

use crate::config::{Command, Config};

type Orchestrator =
    SyncOrchestrator<FileConfigProvider, SourceClientEnum, ActivityRepository, JobRepository>;

const SEPARATOR: &str = "============================================================";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    if let Err(e) = run(config).await {
        if let Some(app_error) = e.downcast_ref::<AppError>() {
            error!("{}", app_error.user_message());
        }
        return Err(e);
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    if let Some(host) = &config.statsd_host {
        install_statsd(host, config.statsd_port)?;
    }

    info!("Connecting to database...");
    let db_config = DbConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    match config.command {
        Command::Migrate => {
            ensure_schema(&pool).await?;
        }
        Command::Sync { source, tenant } => {
            let orchestrator = build_orchestrator(&pool, config.tenants.as_deref(), source.into())?;
            match tenant {
                Some(tenant_id) => {
                    let result = orchestrator.sync_tenant(tenant_id).await?;
                    print_tenant_result(&result);
                }
                None => {
                    let summary = orchestrator
                        .execute_full_sync_with_reporter(&TracingSyncReporter)
                        .await;
                    print_batch_summary(&summary);
                }
            }
        }
        Command::Schedule => {
            run_schedule(&pool, config.tenants.as_deref()).await?;
        }
        Command::Jobs { hours, limit } => {
            show_jobs(JobRepository::new(pool), hours, limit).await?;
        }
    }

    Ok(())
}

fn install_statsd(host: &str, port: u16) -> anyhow::Result<()> {
    let recorder = StatsdBuilder::from(host, port)
        .build(Some("pulse"))
        .context("Failed to build StatsD recorder")?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow::anyhow!("A metrics recorder is already installed"))?;
    RecorderMetrics::describe();
    info!("Reporting metrics to statsd at {}:{}", host, port);
    Ok(())
}

/// Wires the production implementations for one source.
fn build_orchestrator(
    pool: &PgPool,
    tenants_path: Option<&Path>,
    source: ActivitySource,
) -> anyhow::Result<Orchestrator> {
    let provider =
        FileConfigProvider::load(tenants_path).context("Failed to load tenant configuration")?;
    let client = SourceClientEnum::for_source(source, HttpConfig::from_env())?;
    let metrics: Arc<dyn SyncMetrics> = Arc::new(RecorderMetrics);
    let pipeline = Arc::new(ResiliencePipeline::new(
        source,
        ResilienceConfig::from_env(source),
    ));

    Ok(SyncOrchestrator::new(
        provider,
        client,
        pipeline,
        ActivityRepository::with_metrics(pool.clone(), Arc::clone(&metrics)),
        JobRepository::new(pool.clone()),
        metrics,
        SyncConfig::from_env(),
    ))
}

async fn run_schedule(pool: &PgPool, tenants_path: Option<&Path>) -> anyhow::Result<()> {
    let schedule = ScheduleConfig::from_env();
    let lock = LockRepository::new(pool.clone());
    info!(holder = %lock.holder(), "Scheduler lock holder");
    let mut scheduler = Scheduler::new(lock);

    if schedule.jira_enabled {
        let orchestrator = build_orchestrator(pool, tenants_path, ActivitySource::Jira)?;
        scheduler = scheduler.with_sync(orchestrator, schedule.jira_interval);
    }
    if schedule.github_enabled {
        let orchestrator = build_orchestrator(pool, tenants_path, ActivitySource::Github)?;
        scheduler = scheduler.with_sync(orchestrator, schedule.github_interval);
    }

    if scheduler.is_empty() {
        warn!("Every source is disabled, nothing to schedule");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, waiting for running syncs"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        on_signal.cancel();
    });

    scheduler.run(cancel, TracingSyncReporter).await;
    Ok(())
}

async fn show_jobs(jobs: JobRepository, hours: i64, limit: i64) -> anyhow::Result<()> {
    let since = Utc::now() - Duration::hours(hours.max(0));
    let recent = jobs.list_recent_jobs(since, limit).await?;
    let failures = jobs.count_recent_failures(since).await?;

    if recent.is_empty() {
        println!("No sync jobs in the last {} hours.", hours);
        return Ok(());
    }

    println!(
        "{:<36}  {:>6}  {:<15}  {:<16}  {:>7}  {:>5}  STARTED",
        "JOB", "TENANT", "TYPE", "STATUS", "FETCHED", "SAVED"
    );
    for job in &recent {
        println!(
            "{:<36}  {:>6}  {:<15}  {:<16}  {:>7}  {:>5}  {}",
            job.id,
            job.tenant_id,
            job.job_type.as_str(),
            job.status.as_str(),
            job.records_fetched,
            job.records_saved,
            job.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(message) = &job.error_message {
            println!("    {}", message);
        }
    }
    println!();
    println!("Failed jobs in the last {} hours: {}", hours, failures);

    Ok(())
}

fn print_batch_summary(summary: &BatchSyncSummary) {
    info!("");
    info!("{}", SEPARATOR);
    info!("SYNC COMPLETE ({})", summary.correlation_id);
    info!("{}", SEPARATOR);
    info!("  Tenants:             {}", summary.total_tenants);
    info!("  Completed:           {}", summary.completed());
    info!("  Partial failure:     {}", summary.partial());
    info!("  Failed:              {}", summary.failed());
    info!("  Rejected:            {}", summary.rejected.len());
    info!("  Records saved:       {}", summary.total_records_saved());

    if !summary.all_successful() {
        info!("{}", SEPARATOR);
        for result in summary.results.iter().filter(|r| !r.is_success()) {
            let reason = result
                .degraded_reason
                .as_deref()
                .or(result.error_message.as_deref())
                .unwrap_or("unknown");
            error!("  - tenant {} [{}]: {}", result.tenant_id, result.status, reason);
        }
        for tenant_id in &summary.rejected {
            error!("  - tenant {} [REJECTED]: worker pool saturated", tenant_id);
        }
    }
    info!("{}", SEPARATOR);
}

fn print_tenant_result(result: &SyncResult) {
    info!("");
    info!("{}", SEPARATOR);
    info!("Sync complete: tenant {} ({})", result.tenant_id, result.job_type);
    info!("{}", SEPARATOR);
    info!("  Status:              {}", result.status);
    info!("  Fetched:             {}", result.records_fetched);
    info!("  Saved:               {}", result.records_saved);
    info!("  Duration:            {} ms", result.duration_ms);
    if let Some(reason) = &result.degraded_reason {
        warn!("  Degraded:            {}", reason);
    }
    if let Some(message) = &result.error_message {
        error!("  Error:               {}", message);
    }
    info!("{}", SEPARATOR);
}
