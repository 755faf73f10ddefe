//! Scheduler lock table for PostgreSQL.
//!
//! One row per lock name. A lock is held while `lock_until` is in the
//! future; taking it is a single conditional UPSERT, so two replicas racing
//! for the same tick cannot both win.

use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use pulse_core::error::AppError;
use pulse_core::traits::SchedulerLock;

/// PostgreSQL implementation of [`SchedulerLock`].
#[derive(Clone)]
pub struct LockRepository {
    pool: Pool<Postgres>,
    holder: String,
}

impl LockRepository {
    /// Each repository gets its own holder id: `$HOSTNAME-<uuid prefix>`.
    pub fn new(pool: PgPool) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "pulse".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            pool,
            holder: format!("{}-{}", host, &suffix[..8]),
        }
    }

    /// Identity written to `locked_by`.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Current holder of `name`, if the lock is held.
    pub async fn current_holder(&self, name: &str) -> Result<Option<String>, AppError> {
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT locked_by FROM scheduler_locks WHERE name = $1 AND lock_until > NOW()",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(holder)
    }
}

impl SchedulerLock for LockRepository {
    async fn try_lock(&self, name: &str, lock_at_most_for: Duration) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_locks (name, lock_until, locked_at, locked_by)
            VALUES ($1, NOW() + make_interval(secs => $2), NOW(), $3)
            ON CONFLICT (name) DO UPDATE
            SET
                lock_until = EXCLUDED.lock_until,
                locked_at = EXCLUDED.locked_at,
                locked_by = EXCLUDED.locked_by
            WHERE scheduler_locks.lock_until <= NOW()
            "#,
        )
        .bind(name)
        .bind(lock_at_most_for.as_secs_f64())
        .bind(&self.holder)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() > 0;
        debug!(lock = name, holder = %self.holder, acquired, "Scheduler lock attempt");
        Ok(acquired)
    }

    async fn unlock(&self, name: &str, lock_at_least_for: Duration) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scheduler_locks
            SET lock_until = GREATEST(NOW(), locked_at + make_interval(secs => $2))
            WHERE name = $1 AND locked_by = $3
            "#,
        )
        .bind(name)
        .bind(lock_at_least_for.as_secs_f64())
        .bind(&self.holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
