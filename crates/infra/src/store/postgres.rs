//! Postgres-backed stores.
//!
//! Each collection is a table holding the JSON document (`doc JSONB`) next to
//! the few columns that queries filter on. The columns are derived from the
//! document on every write and never written independently.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (query canceled by `statement_timeout`) | `57014` | `Timeout` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other | N/A | `Unavailable` |
//!
//! ## Field-level updates
//!
//! Session updates lock the row (`SELECT … FOR UPDATE`), validate the patch
//! against the current document in Rust, then merge only the patched keys
//! with `doc || $patch`. Keys written by other writers are never overwritten.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;

use bilee_core::{CustomerId, MerchantId, ReceiptId, SessionId};
use bilee_receipts::{MerchantProfile, Receipt};
use bilee_reporting::DailyAggregate;
use bilee_sessions::{BillingSession, SessionPatch};

use super::{
    AggregateStore, ArchiveStore, ArchivedSession, InsertOutcome, MerchantDirectory, ReceiptCursor, ReceiptStore,
    SessionChange, SessionQuery, SessionStore,
};
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                TEXT PRIMARY KEY,
    merchant_id       TEXT NOT NULL,
    status            TEXT NOT NULL,
    payment_status    TEXT NOT NULL,
    receipt_generated BOOLEAN NOT NULL DEFAULT FALSE,
    expires_at        TIMESTAMPTZ NOT NULL,
    completed_at      TIMESTAMPTZ,
    doc               JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_status_expires_idx ON sessions (status, expires_at);
CREATE INDEX IF NOT EXISTS sessions_merchant_completed_idx ON sessions (merchant_id, status, completed_at);

CREATE TABLE IF NOT EXISTS receipts (
    receipt_id  TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL UNIQUE,
    customer_id TEXT,
    created_at  TIMESTAMPTZ NOT NULL,
    doc         JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS receipts_missing_customer_idx ON receipts (created_at, receipt_id COLLATE "C") WHERE customer_id IS NULL;

CREATE TABLE IF NOT EXISTS merchants (
    id  TEXT PRIMARY KEY,
    doc JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_aggregates (
    merchant_id TEXT NOT NULL,
    date        DATE NOT NULL,
    doc         JSONB NOT NULL,
    PRIMARY KEY (merchant_id, date)
);

CREATE TABLE IF NOT EXISTS archived_sessions (
    id          TEXT PRIMARY KEY,
    archived_at TIMESTAMPTZ NOT NULL,
    doc         JSONB NOT NULL
);
"#;

/// All Postgres-backed collections over one connection pool.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PostgresStores {
    pool: PgPool,
}

impl PostgresStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with `timeout` bounding both pool acquisition and each
    /// statement.
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid DATABASE_URL: {e}")))?
            .options([("statement_timeout", format!("{}ms", timeout.as_millis()))]);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert a merchant profile.
    pub async fn put_merchant(&self, merchant_id: &MerchantId, profile: &MerchantProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO merchants (id, doc) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(merchant_id.as_str())
        .bind(Json(profile))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_merchant", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))
    }
}

async fn lock_session(
    tx: &mut Transaction<'_, Postgres>,
    id: &SessionId,
    operation: &str,
) -> Result<BillingSession, StoreError> {
    let row = sqlx::query("SELECT doc FROM sessions WHERE id = $1 FOR UPDATE")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?
        .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
    decode_doc(&row, operation)
}

/// Validate `patch` against the locked row and merge it in.
async fn patch_locked(
    tx: &mut Transaction<'_, Postgres>,
    id: &SessionId,
    patch: &SessionPatch,
    operation: &str,
) -> Result<SessionChange, StoreError> {
    let before = lock_session(tx, id, operation).await?;
    let mut after = before.clone();
    after.apply_patch(patch)?;

    sqlx::query(
        "UPDATE sessions
         SET doc = doc || $2,
             status = $3,
             payment_status = $4,
             receipt_generated = $5,
             completed_at = $6
         WHERE id = $1",
    )
    .bind(id.as_str())
    .bind(Json(patch))
    .bind(after.status.as_str())
    .bind(after.payment_status.as_str())
    .bind(after.receipt_generated)
    .bind(after.completed_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;

    Ok(SessionChange { before, after })
}

fn decode_doc<T>(row: &sqlx::postgres::PgRow, operation: &str) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    let Json(doc) = row
        .try_get::<Json<T>, _>("doc")
        .map_err(|e| StoreError::Serialization(format!("{operation}: {e}")))?;
    Ok(doc)
}

#[async_trait]
impl SessionStore for PostgresStores {
    #[instrument(skip_all, fields(session_id = %session.id), err)]
    async fn create(&self, session: BillingSession) -> Result<BillingSession, StoreError> {
        sqlx::query(
            "INSERT INTO sessions
                (id, merchant_id, status, payment_status, receipt_generated, expires_at, completed_at, doc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id.as_str())
        .bind(session.merchant_id.as_str())
        .bind(session.status.as_str())
        .bind(session.payment_status.as_str())
        .bind(session.receipt_generated)
        .bind(session.expires_at)
        .bind(session.completed_at)
        .bind(Json(&session))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_session", e))?;
        Ok(session)
    }

    #[instrument(skip_all, fields(session_id = %id), err)]
    async fn get(&self, id: &SessionId) -> Result<Option<BillingSession>, StoreError> {
        let row = sqlx::query("SELECT doc FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_session", e))?;
        row.map(|r| decode_doc(&r, "get_session")).transpose()
    }

    #[instrument(skip_all, fields(session_id = %id), err)]
    async fn update(&self, id: &SessionId, patch: &SessionPatch) -> Result<SessionChange, StoreError> {
        let mut tx = self.begin("update_session").await?;
        let change = patch_locked(&mut tx, id, patch, "update_session").await?;
        tx.commit().await.map_err(|e| map_sqlx_error("update_session", e))?;
        Ok(change)
    }

    #[instrument(skip_all, fields(count = updates.len()), err)]
    async fn update_batch(
        &self,
        updates: &[(SessionId, SessionPatch)],
    ) -> Result<Vec<SessionChange>, StoreError> {
        let mut tx = self.begin("update_sessions").await?;
        let mut changes = Vec::with_capacity(updates.len());
        for (id, patch) in updates {
            changes.push(patch_locked(&mut tx, id, patch, "update_sessions").await?);
        }
        tx.commit().await.map_err(|e| map_sqlx_error("update_sessions", e))?;
        Ok(changes)
    }

    #[instrument(skip_all, fields(count = ids.len()), err)]
    async fn delete_batch(&self, ids: &[SessionId]) -> Result<usize, StoreError> {
        let ids: Vec<&str> = ids.iter().map(SessionId::as_str).collect();
        let result = sqlx::query("DELETE FROM sessions WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_sessions", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip_all, err)]
    async fn query(&self, query: &SessionQuery) -> Result<Vec<BillingSession>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM sessions WHERE TRUE");
        if let Some(merchant_id) = &query.merchant_id {
            qb.push(" AND merchant_id = ").push_bind(merchant_id.as_str().to_string());
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = query.payment_status {
            qb.push(" AND payment_status = ").push_bind(payment_status.as_str());
        }
        if let Some(generated) = query.receipt_generated {
            qb.push(" AND receipt_generated = ").push_bind(generated);
        }
        if let Some(at) = query.expires_before {
            qb.push(" AND expires_at < ").push_bind(at);
        }
        if let Some((start, end)) = query.completed_between {
            qb.push(" AND completed_at >= ").push_bind(start);
            qb.push(" AND completed_at < ").push_bind(end);
        }
        qb.push(" ORDER BY id");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_sessions", e))?;
        rows.iter().map(|r| decode_doc(r, "query_sessions")).collect()
    }
}

#[async_trait]
impl ReceiptStore for PostgresStores {
    #[instrument(skip_all, fields(session_id = %receipt.session_id, receipt_id = %receipt.receipt_id), err)]
    async fn insert_if_absent(&self, receipt: Receipt) -> Result<InsertOutcome<Receipt>, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO receipts (receipt_id, session_id, customer_id, created_at, doc)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (session_id) DO NOTHING
             RETURNING receipt_id",
        )
        .bind(receipt.receipt_id.as_str())
        .bind(receipt.session_id.as_str())
        .bind(receipt.customer_id.as_ref().map(CustomerId::as_str))
        .bind(receipt.created_at)
        .bind(Json(&receipt))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_receipt", e))?;

        if inserted.is_some() {
            return Ok(InsertOutcome::Inserted(receipt));
        }
        match self.find_by_session(&receipt.session_id).await? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            // The conflicting row vanished between the two statements; receipts
            // are never deleted, so treat it as a lost race.
            None => Err(StoreError::Conflict(format!(
                "receipt for session {} conflicted but could not be read",
                receipt.session_id
            ))),
        }
    }

    #[instrument(skip_all, fields(session_id = %session_id), err)]
    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<Receipt>, StoreError> {
        let row = sqlx::query("SELECT doc FROM receipts WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_receipt_by_session", e))?;
        row.map(|r| decode_doc(&r, "find_receipt_by_session")).transpose()
    }

    #[instrument(skip_all, fields(receipt_id = %id), err)]
    async fn get(&self, id: &ReceiptId) -> Result<Option<Receipt>, StoreError> {
        let row = sqlx::query("SELECT doc FROM receipts WHERE receipt_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_receipt", e))?;
        row.map(|r| decode_doc(&r, "get_receipt")).transpose()
    }

    #[instrument(skip(self), err)]
    async fn missing_customer(
        &self,
        after: Option<&ReceiptCursor>,
        limit: usize,
    ) -> Result<Vec<Receipt>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM receipts WHERE customer_id IS NULL");
        if let Some(cursor) = after {
            qb.push(" AND (created_at, receipt_id COLLATE \"C\") > (")
                .push_bind(cursor.created_at)
                .push(", ")
                .push_bind(cursor.receipt_id.as_str().to_string())
                .push(")");
        }
        qb.push(" ORDER BY created_at, receipt_id COLLATE \"C\" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("missing_customer", e))?;
        rows.iter().map(|r| decode_doc(r, "missing_customer")).collect()
    }

    #[instrument(skip_all, fields(receipt_id = %id), err)]
    async fn set_customer(
        &self,
        id: &ReceiptId,
        customer_id: &CustomerId,
        at: DateTime<Utc>,
    ) -> Result<Receipt, StoreError> {
        let mut tx = self.begin("set_customer").await?;
        let row = sqlx::query("SELECT doc FROM receipts WHERE receipt_id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_customer", e))?
            .ok_or_else(|| StoreError::NotFound(format!("receipt {id}")))?;
        let mut receipt: Receipt = decode_doc(&row, "set_customer")?;
        receipt.backfill_customer(customer_id.clone(), at)?;

        sqlx::query("UPDATE receipts SET customer_id = $2, doc = $3 WHERE receipt_id = $1")
            .bind(id.as_str())
            .bind(customer_id.as_str())
            .bind(Json(&receipt))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_customer", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("set_customer", e))?;
        Ok(receipt)
    }
}

#[async_trait]
impl MerchantDirectory for PostgresStores {
    #[instrument(skip_all, fields(merchant_id = %merchant_id), err)]
    async fn profile(&self, merchant_id: &MerchantId) -> Result<Option<MerchantProfile>, StoreError> {
        let row = sqlx::query("SELECT doc FROM merchants WHERE id = $1")
            .bind(merchant_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("merchant_profile", e))?;
        row.map(|r| decode_doc(&r, "merchant_profile")).transpose()
    }
}

#[async_trait]
impl AggregateStore for PostgresStores {
    #[instrument(skip_all, fields(merchant_id = %aggregate.merchant_id, date = %aggregate.date), err)]
    async fn put(&self, aggregate: &DailyAggregate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO daily_aggregates (merchant_id, date, doc) VALUES ($1, $2, $3)
             ON CONFLICT (merchant_id, date) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(aggregate.merchant_id.as_str())
        .bind(aggregate.date)
        .bind(Json(aggregate))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_aggregate", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(merchant_id = %merchant_id, date = %date), err)]
    async fn get(&self, merchant_id: &MerchantId, date: NaiveDate) -> Result<Option<DailyAggregate>, StoreError> {
        let row = sqlx::query("SELECT doc FROM daily_aggregates WHERE merchant_id = $1 AND date = $2")
            .bind(merchant_id.as_str())
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_aggregate", e))?;
        row.map(|r| decode_doc(&r, "get_aggregate")).transpose()
    }
}

#[async_trait]
impl ArchiveStore for PostgresStores {
    #[instrument(skip_all, fields(count = sessions.len()), err)]
    async fn put_batch(&self, sessions: &[ArchivedSession]) -> Result<(), StoreError> {
        let mut tx = self.begin("archive_sessions").await?;
        for entry in sessions {
            sqlx::query(
                "INSERT INTO archived_sessions (id, archived_at, doc) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET archived_at = EXCLUDED.archived_at, doc = EXCLUDED.doc",
            )
            .bind(entry.session.id.as_str())
            .bind(entry.archived_at)
            .bind(Json(entry))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("archive_sessions", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("archive_sessions", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %id), err)]
    async fn get(&self, id: &SessionId) -> Result<Option<ArchivedSession>, StoreError> {
        let row = sqlx::query("SELECT doc FROM archived_sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_archived", e))?;
        row.map(|r| decode_doc(&r, "get_archived")).transpose()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(format!("connection pool timed out in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
