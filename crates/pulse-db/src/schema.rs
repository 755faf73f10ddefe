//! Table definitions and bootstrap.

use sqlx::PgPool;
use tracing::info;

use pulse_core::error::AppError;

/// DDL statements, applied in order.
///
/// Each statement is executed separately; all of them are idempotent.
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS unified_activities (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        source VARCHAR(16) NOT NULL,
        activity_type VARCHAR(32) NOT NULL,
        external_id VARCHAR(255) NOT NULL,
        title TEXT,
        description TEXT,
        author_email VARCHAR(255),
        author_name VARCHAR(255),
        status VARCHAR(64),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT uk_activity_natural_key UNIQUE (tenant_id, source, external_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_activities_tenant_updated ON unified_activities(tenant_id, updated_at DESC)",
    r#"CREATE TABLE IF NOT EXISTS jira_issues (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        issue_key VARCHAR(64) NOT NULL,
        issue_id VARCHAR(64) NOT NULL,
        summary TEXT,
        description TEXT,
        issue_type VARCHAR(64),
        status VARCHAR(64),
        priority VARCHAR(64),
        assignee_email VARCHAR(255),
        assignee_name VARCHAR(255),
        reporter_email VARCHAR(255),
        reporter_name VARCHAR(255),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT uk_jira_issue_key UNIQUE (tenant_id, issue_key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS github_commits (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        commit_sha VARCHAR(64) NOT NULL,
        message TEXT,
        author_name VARCHAR(255),
        author_email VARCHAR(255),
        author_login VARCHAR(255),
        committed_date TIMESTAMPTZ NOT NULL,
        additions INTEGER NOT NULL DEFAULT 0,
        deletions INTEGER NOT NULL DEFAULT 0,
        total_changes INTEGER NOT NULL DEFAULT 0,
        files_changed INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT uk_github_commit_sha UNIQUE (tenant_id, commit_sha)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_jobs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        tenant_id BIGINT NOT NULL,
        job_type VARCHAR(32) NOT NULL,
        status VARCHAR(32) NOT NULL DEFAULT 'RUNNING'
            CHECK (status IN ('RUNNING', 'COMPLETED', 'PARTIAL_FAILURE', 'FAILED')),
        correlation_id VARCHAR(64) NOT NULL,
        records_fetched INTEGER NOT NULL DEFAULT 0,
        records_saved INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at TIMESTAMPTZ
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sync_jobs_started ON sync_jobs(started_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sync_jobs_tenant_type ON sync_jobs(tenant_id, job_type, status)",
    r#"CREATE TABLE IF NOT EXISTS scheduler_locks (
        name VARCHAR(64) PRIMARY KEY,
        lock_until TIMESTAMPTZ NOT NULL,
        locked_at TIMESTAMPTZ NOT NULL,
        locked_by VARCHAR(255) NOT NULL
    )"#,
];

/// Creates missing tables and indexes.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "Database schema is up to date");
    Ok(())
}
