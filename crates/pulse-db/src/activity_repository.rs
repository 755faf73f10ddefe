//! Activity repository for PostgreSQL with chunked idempotent upserts.
//!
//! Every write is an `INSERT ... ON CONFLICT (natural key) DO UPDATE` built
//! with [`QueryBuilder`], at most [`UPSERT_CHUNK_SIZE`] rows per statement
//! and one short transaction per statement. Re-running a sync over the same
//! data therefore never adds rows.
//!
//! On conflict the mutable columns take the incoming values and
//! `updated_at` takes the source system's timestamp. `created_at` and the
//! natural key are never touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use tracing::{debug, error};

use pulse_core::error::AppError;
use pulse_core::metrics::{NoopMetrics, SyncMetrics};
use pulse_core::models::{ActivitySource, GithubCommit, JiraIssue, UnifiedActivity};
use pulse_core::persistence::{UPSERT_CHUNK_SIZE, UpsertSummary, dedup_last_wins, upsert_in_chunks};
use pulse_core::traits::ActivityStore;

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

const ACTIVITY_COLUMNS: &str = "tenant_id, source, activity_type, external_id, title, description, author_email, author_name, status, created_at, updated_at";
const JIRA_ISSUE_COLUMNS: &str = "tenant_id, issue_key, issue_id, summary, description, issue_type, status, priority, assignee_email, assignee_name, reporter_email, reporter_name, created_at, updated_at";
const GITHUB_COMMIT_COLUMNS: &str = "tenant_id, commit_sha, message, author_name, author_email, author_login, committed_date, additions, deletions, total_changes, files_changed, created_at, updated_at";

/// Repository for synced activity data.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use pulse_db::ActivityRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/pulse")
///     .await?;
///
/// let repo = ActivityRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ActivityRepository {
    pool: Pool<Postgres>,
    metrics: Arc<dyn SyncMetrics>,
    chunk_size: usize,
}

impl ActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_metrics(pool, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(pool: PgPool, metrics: Arc<dyn SyncMetrics>) -> Self {
        Self {
            pool,
            metrics,
            chunk_size: UPSERT_CHUNK_SIZE,
        }
    }

    /// Overrides the number of rows per statement.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upserts unified activities on `(tenant_id, source, external_id)`.
    pub async fn save_activities(
        &self,
        activities: &[UnifiedActivity],
    ) -> Result<UpsertSummary, AppError> {
        let summary = upsert_in_chunks(activities, self.chunk_size, |chunk| {
            self.write_activity_chunk(chunk)
        })
        .await?;
        debug!(
            table = "unified_activities",
            rows = activities.len(),
            affected = summary.affected,
            chunks = summary.chunks,
            "Upserted activities"
        );
        Ok(summary)
    }

    /// Upserts Jira issues on `(tenant_id, issue_key)`.
    pub async fn save_jira_issues(&self, issues: &[JiraIssue]) -> Result<UpsertSummary, AppError> {
        let summary = upsert_in_chunks(issues, self.chunk_size, |chunk| {
            self.write_jira_issue_chunk(chunk)
        })
        .await?;
        debug!(
            table = "jira_issues",
            rows = issues.len(),
            affected = summary.affected,
            chunks = summary.chunks,
            "Upserted Jira issues"
        );
        Ok(summary)
    }

    /// Upserts GitHub commits on `(tenant_id, commit_sha)`.
    pub async fn save_github_commits(
        &self,
        commits: &[GithubCommit],
    ) -> Result<UpsertSummary, AppError> {
        let summary = upsert_in_chunks(commits, self.chunk_size, |chunk| {
            self.write_github_commit_chunk(chunk)
        })
        .await?;
        debug!(
            table = "github_commits",
            rows = commits.len(),
            affected = summary.affected,
            chunks = summary.chunks,
            "Upserted GitHub commits"
        );
        Ok(summary)
    }

    async fn write_activity_chunk(&self, chunk: &[UnifiedActivity]) -> Result<u64, AppError> {
        let rows = dedup_last_wins(chunk, |a| (a.tenant_id, a.source, a.external_id.as_str()));

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO unified_activities ({}) ", ACTIVITY_COLUMNS));
        qb.push_values(rows, |mut b, a| {
            b.push_bind(a.tenant_id)
                .push_bind(a.source.as_str())
                .push_bind(a.activity_type.as_str())
                .push_bind(a.external_id.as_str())
                .push_bind(a.title.as_deref())
                .push_bind(a.description.as_deref())
                .push_bind(a.author_email.as_deref())
                .push_bind(a.author_name.as_deref())
                .push_bind(a.status.as_deref())
                .push_bind(a.created_at)
                .push_bind(a.updated_at);
        });
        qb.push(
            r#"
            ON CONFLICT (tenant_id, source, external_id)
            DO UPDATE SET
                activity_type = EXCLUDED.activity_type,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                author_email = EXCLUDED.author_email,
                author_name = EXCLUDED.author_name,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        );

        self.execute_chunk(qb, "unified_activities").await
    }

    async fn write_jira_issue_chunk(&self, chunk: &[JiraIssue]) -> Result<u64, AppError> {
        let rows = dedup_last_wins(chunk, |i| (i.tenant_id, i.issue_key.as_str()));

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO jira_issues ({}) ", JIRA_ISSUE_COLUMNS));
        qb.push_values(rows, |mut b, i| {
            b.push_bind(i.tenant_id)
                .push_bind(i.issue_key.as_str())
                .push_bind(i.issue_id.as_str())
                .push_bind(i.summary.as_deref())
                .push_bind(i.description.as_deref())
                .push_bind(i.issue_type.as_deref())
                .push_bind(i.status.as_deref())
                .push_bind(i.priority.as_deref())
                .push_bind(i.assignee_email.as_deref())
                .push_bind(i.assignee_name.as_deref())
                .push_bind(i.reporter_email.as_deref())
                .push_bind(i.reporter_name.as_deref())
                .push_bind(i.created_at)
                .push_bind(i.updated_at);
        });
        qb.push(
            r#"
            ON CONFLICT (tenant_id, issue_key)
            DO UPDATE SET
                issue_id = EXCLUDED.issue_id,
                summary = EXCLUDED.summary,
                description = EXCLUDED.description,
                issue_type = EXCLUDED.issue_type,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                assignee_email = EXCLUDED.assignee_email,
                assignee_name = EXCLUDED.assignee_name,
                reporter_email = EXCLUDED.reporter_email,
                reporter_name = EXCLUDED.reporter_name,
                updated_at = EXCLUDED.updated_at
            "#,
        );

        self.execute_chunk(qb, "jira_issues").await
    }

    async fn write_github_commit_chunk(&self, chunk: &[GithubCommit]) -> Result<u64, AppError> {
        let rows = dedup_last_wins(chunk, |c| (c.tenant_id, c.commit_sha.as_str()));

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO github_commits ({}) ", GITHUB_COMMIT_COLUMNS));
        qb.push_values(rows, |mut b, c| {
            b.push_bind(c.tenant_id)
                .push_bind(c.commit_sha.as_str())
                .push_bind(c.message.as_deref())
                .push_bind(c.author_name.as_deref())
                .push_bind(c.author_email.as_deref())
                .push_bind(c.author_login.as_deref())
                .push_bind(c.committed_date)
                .push_bind(c.additions)
                .push_bind(c.deletions)
                .push_bind(c.total_changes)
                .push_bind(c.files_changed)
                .push_bind(c.created_at)
                .push_bind(c.updated_at);
        });
        qb.push(
            r#"
            ON CONFLICT (tenant_id, commit_sha)
            DO UPDATE SET
                message = EXCLUDED.message,
                author_name = EXCLUDED.author_name,
                author_email = EXCLUDED.author_email,
                author_login = EXCLUDED.author_login,
                committed_date = EXCLUDED.committed_date,
                additions = EXCLUDED.additions,
                deletions = EXCLUDED.deletions,
                total_changes = EXCLUDED.total_changes,
                files_changed = EXCLUDED.files_changed,
                updated_at = EXCLUDED.updated_at
            "#,
        );

        self.execute_chunk(qb, "github_commits").await
    }

    /// Runs one chunk statement in its own transaction.
    async fn execute_chunk(
        &self,
        mut qb: QueryBuilder<'_, Postgres>,
        table: &'static str,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|e| self.classify(table, e))?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    fn classify(&self, table: &'static str, e: sqlx::Error) -> AppError {
        let is_unique_violation = e
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);

        if !is_unique_violation {
            return AppError::DatabaseError(e);
        }

        self.metrics.constraint_violation(table);
        error!(table, error = %e, "Unique constraint violated outside the upsert path");
        AppError::ConstraintViolation {
            table: table.to_string(),
            message: e.to_string(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Number of activities stored for `tenant_id`.
    pub async fn count_activities(&self, tenant_id: i64) -> Result<i64, AppError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM unified_activities WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    pub async fn get_activity(
        &self,
        tenant_id: i64,
        source: ActivitySource,
        external_id: &str,
    ) -> Result<Option<UnifiedActivity>, AppError> {
        let query = format!(
            "SELECT {} FROM unified_activities WHERE tenant_id = $1 AND source = $2 AND external_id = $3",
            ACTIVITY_COLUMNS
        );
        let row: Option<ActivityRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(source.as_str())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UnifiedActivity::try_from).transpose()
    }

    pub async fn get_jira_issue(
        &self,
        tenant_id: i64,
        issue_key: &str,
    ) -> Result<Option<JiraIssue>, AppError> {
        let query = format!(
            "SELECT {} FROM jira_issues WHERE tenant_id = $1 AND issue_key = $2",
            JIRA_ISSUE_COLUMNS
        );
        let row: Option<JiraIssueRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(issue_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_github_commit(
        &self,
        tenant_id: i64,
        commit_sha: &str,
    ) -> Result<Option<GithubCommit>, AppError> {
        let query = format!(
            "SELECT {} FROM github_commits WHERE tenant_id = $1 AND commit_sha = $2",
            GITHUB_COMMIT_COLUMNS
        );
        let row: Option<GithubCommitRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(commit_sha)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ActivityRow {
    tenant_id: i64,
    source: String,
    activity_type: String,
    external_id: String,
    title: Option<String>,
    description: Option<String>,
    author_email: Option<String>,
    author_name: Option<String>,
    status: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for UnifiedActivity {
    type Error = AppError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: row.tenant_id,
            source: row.source.parse()?,
            activity_type: row.activity_type.parse()?,
            external_id: row.external_id,
            title: row.title,
            description: row.description,
            author_email: row.author_email,
            author_name: row.author_name,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JiraIssueRow {
    tenant_id: i64,
    issue_key: String,
    issue_id: String,
    summary: Option<String>,
    description: Option<String>,
    issue_type: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    assignee_email: Option<String>,
    assignee_name: Option<String>,
    reporter_email: Option<String>,
    reporter_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JiraIssueRow> for JiraIssue {
    fn from(row: JiraIssueRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            issue_key: row.issue_key,
            issue_id: row.issue_id,
            summary: row.summary,
            description: row.description,
            issue_type: row.issue_type,
            status: row.status,
            priority: row.priority,
            assignee_email: row.assignee_email,
            assignee_name: row.assignee_name,
            reporter_email: row.reporter_email,
            reporter_name: row.reporter_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GithubCommitRow {
    tenant_id: i64,
    commit_sha: String,
    message: Option<String>,
    author_name: Option<String>,
    author_email: Option<String>,
    author_login: Option<String>,
    committed_date: DateTime<Utc>,
    additions: i32,
    deletions: i32,
    total_changes: i32,
    files_changed: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GithubCommitRow> for GithubCommit {
    fn from(row: GithubCommitRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            commit_sha: row.commit_sha,
            message: row.message,
            author_name: row.author_name,
            author_email: row.author_email,
            author_login: row.author_login,
            committed_date: row.committed_date,
            additions: row.additions,
            deletions: row.deletions,
            total_changes: row.total_changes,
            files_changed: row.files_changed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// ActivityStore Trait Implementation
// =============================================================================

impl ActivityStore for ActivityRepository {
    async fn upsert_activities(&self, activities: &[UnifiedActivity]) -> Result<u64, AppError> {
        Ok(self.save_activities(activities).await?.affected)
    }

    async fn upsert_jira_issues(&self, issues: &[JiraIssue]) -> Result<u64, AppError> {
        Ok(self.save_jira_issues(issues).await?.affected)
    }

    async fn upsert_github_commits(&self, commits: &[GithubCommit]) -> Result<u64, AppError> {
        Ok(self.save_github_commits(commits).await?.affected)
    }
}
