use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::outbox::{
    failed_reason, NewOutboxEntry, OutboxEntry, OutboxSink, OutboxStatus, OutboxStore, StoreError,
};
use crate::users::{NewUser, User};
use crate::utils::{retry_with_backoff, RetryConfig};

use super::{TransactionalStore, UnitOfWork};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Relay operations run on the pool, one statement each, so every mutation is
// individually atomic. Status transitions are guarded with
// `status = 'PENDING'` so a terminal row can never move again.
//
// `find_unprocessed` takes no row locks: running more than one relay process
// against the same database can publish a row twice.
//
// ============================================================================

const SCHEMA: &str = include_str!("schema.sql");

const UNIQUE_VIOLATION: &str = "23505";

const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, status, \
                              attempts, last_error, created_at, processed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with exponential backoff, as the database may still be starting
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let retry = RetryConfig::exponential(
            config.connect_max_attempts,
            Duration::from_millis(config.connect_initial_backoff_ms),
            Duration::from_millis(config.connect_max_backoff_ms),
        );

        let pool = retry_with_backoff(retry, |attempt| async move {
            tracing::info!(attempt, "🔗 Connecting to PostgreSQL");
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
        })
        .await
        .into_result()?;

        tracing::info!("✅ Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Database schema applied");
        Ok(())
    }
}

fn map_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::UniqueViolation(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status.parse::<OutboxStatus>().map_err(|reason| StoreError::CorruptRow {
        id: id.to_string(),
        reason,
    })?;

    Ok(OutboxEntry {
        id,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl TransactionalStore for PgStore {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(PgUnitOfWork {
            tx: self.pool.begin().await?,
        })
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn find_unprocessed(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox \
             WHERE status = 'PENDING' \
             ORDER BY created_at ASC \
             LIMIT $1"
        );

        let rows = sqlx::query(&sql)
            .bind(batch_size as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn mark_as_processed(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            "UPDATE outbox SET status = 'PROCESSED', processed_at = NOW() \
             WHERE id = ANY($1) AND status = 'PENDING'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() < ids.len() as u64 {
            tracing::warn!(
                requested = ids.len(),
                updated = result.rows_affected(),
                "Some outbox entries were no longer pending"
            );
        }
        Ok(())
    }

    async fn increment_attempt(&self, id: Uuid, last_error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_error = $2 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox SET status = 'FAILED', last_error = $2 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(failed_reason(reason))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// An open Postgres transaction; rolled back by sqlx on drop unless committed
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OutboxSink for PgUnitOfWork {
    async fn insert_outbox_entry(&mut self, entry: NewOutboxEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, status, attempts, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6)",
        )
        .bind(entry.id)
        .bind(&entry.aggregate_type)
        .bind(&entry.aggregate_id)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, external_id, email, name FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_for_update(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, external_id, email, name FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, external_id, email, name FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_external_id(&mut self, external_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, external_id, email, name FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&mut self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT id, external_id, email, name FROM users ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            "INSERT INTO users (external_id, email, name) VALUES ($1, $2, $3) \
             RETURNING id, external_id, email, name",
        )
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_unique)?;
        user_from_row(&row)
    }

    async fn update_user(&mut self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET external_id = $2, email = $3, name = $4 WHERE id = $1")
            .bind(user.id)
            .bind(&user.external_id)
            .bind(&user.email)
            .bind(&user.name)
            .execute(&mut *self.tx)
            .await
            .map_err(map_unique)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_unique)
    }
}
