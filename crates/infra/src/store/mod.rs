//! Store boundary.
//!
//! Every collection the pipeline touches is reached through one of these
//! traits and injected as `Arc<dyn …>`, so components never know whether they
//! run against Postgres or the in-memory backend.
//!
//! Guarantees expected from every backend:
//! - single-document reads and writes are atomic
//! - `SessionStore::update` is a field-level merge, never a full overwrite
//! - `SessionStore::update_batch` commits all documents or none
//! - `ReceiptStore::insert_if_absent` is an atomic create-if-absent keyed by
//!   session id

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use bilee_core::{CustomerId, MerchantId, ReceiptId, SessionId};
use bilee_receipts::{MerchantProfile, Receipt};
use bilee_reporting::DailyAggregate;
use bilee_sessions::{BillingSession, PaymentStatus, SessionPatch, SessionStatus};

use crate::error::StoreError;

pub mod in_memory;
pub mod postgres;
pub mod publishing;

pub use in_memory::{
    InMemoryAggregateStore, InMemoryArchiveStore, InMemoryMerchantDirectory, InMemoryReceiptStore,
    InMemorySessionStore,
};
pub use postgres::PostgresStores;
pub use publishing::PublishingSessionStore;

/// Result of a single-document session update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub before: BillingSession,
    pub after: BillingSession,
}

/// Equality and range filters over the sessions collection.
///
/// Results are ordered by session id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    pub merchant_id: Option<MerchantId>,
    pub status: Option<SessionStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub receipt_generated: Option<bool>,
    /// `expiresAt < t`
    pub expires_before: Option<DateTime<Utc>>,
    /// `start <= completedAt < end`
    pub completed_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merchant(mut self, merchant_id: MerchantId) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn receipt_generated(mut self, generated: bool) -> Self {
        self.receipt_generated = Some(generated);
        self
    }

    pub fn expires_before(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    pub fn completed_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.completed_between = Some((start, end));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, session: &BillingSession) -> bool {
        if self.merchant_id.as_ref().is_some_and(|m| m != &session.merchant_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != session.status) {
            return false;
        }
        if self.payment_status.is_some_and(|p| p != session.payment_status) {
            return false;
        }
        if self.receipt_generated.is_some_and(|r| r != session.receipt_generated) {
            return false;
        }
        if self.expires_before.is_some_and(|t| session.expires_at >= t) {
            return false;
        }
        if let Some((start, end)) = self.completed_between {
            match session.completed_at {
                Some(at) if start <= at && at < end => {}
                _ => return false,
            }
        }
        true
    }
}

/// A session retired from the live collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedSession {
    #[serde(flatten)]
    pub session: BillingSession,
    pub archived_at: DateTime<Utc>,
}

/// Keyset position in the receipt scan order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReceiptCursor {
    pub created_at: DateTime<Utc>,
    pub receipt_id: ReceiptId,
}

impl ReceiptCursor {
    pub fn of(receipt: &Receipt) -> Self {
        Self {
            created_at: receipt.created_at,
            receipt_id: receipt.receipt_id.clone(),
        }
    }
}

/// Outcome of an atomic create-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// Another record already holds the key; it is returned unchanged.
    Existing(T),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `Conflict` if the id is taken.
    async fn create(&self, session: BillingSession) -> Result<BillingSession, StoreError>;

    async fn get(&self, id: &SessionId) -> Result<Option<BillingSession>, StoreError>;

    async fn update(&self, id: &SessionId, patch: &SessionPatch) -> Result<SessionChange, StoreError>;

    /// All-or-nothing: if any document is missing or rejects its patch,
    /// nothing is written.
    async fn update_batch(
        &self,
        updates: &[(SessionId, SessionPatch)],
    ) -> Result<Vec<SessionChange>, StoreError>;

    /// Delete documents; missing ids are ignored. Returns how many were removed.
    async fn delete_batch(&self, ids: &[SessionId]) -> Result<usize, StoreError>;

    async fn query(&self, query: &SessionQuery) -> Result<Vec<BillingSession>, StoreError>;
}

/// Lets a type-erased backend be wrapped by store decorators.
#[async_trait]
impl<T> SessionStore for Arc<T>
where
    T: SessionStore + ?Sized,
{
    async fn create(&self, session: BillingSession) -> Result<BillingSession, StoreError> {
        (**self).create(session).await
    }

    async fn get(&self, id: &SessionId) -> Result<Option<BillingSession>, StoreError> {
        (**self).get(id).await
    }

    async fn update(&self, id: &SessionId, patch: &SessionPatch) -> Result<SessionChange, StoreError> {
        (**self).update(id, patch).await
    }

    async fn update_batch(
        &self,
        updates: &[(SessionId, SessionPatch)],
    ) -> Result<Vec<SessionChange>, StoreError> {
        (**self).update_batch(updates).await
    }

    async fn delete_batch(&self, ids: &[SessionId]) -> Result<usize, StoreError> {
        (**self).delete_batch(ids).await
    }

    async fn query(&self, query: &SessionQuery) -> Result<Vec<BillingSession>, StoreError> {
        (**self).query(query).await
    }
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert_if_absent(&self, receipt: Receipt) -> Result<InsertOutcome<Receipt>, StoreError>;

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<Receipt>, StoreError>;

    async fn get(&self, id: &ReceiptId) -> Result<Option<Receipt>, StoreError>;

    /// Receipts with no `customerId`, ordered by `(createdAt, receiptId)` and
    /// strictly after `after` when given.
    async fn missing_customer(
        &self,
        after: Option<&ReceiptCursor>,
        limit: usize,
    ) -> Result<Vec<Receipt>, StoreError>;

    async fn set_customer(
        &self,
        id: &ReceiptId,
        customer_id: &CustomerId,
        at: DateTime<Utc>,
    ) -> Result<Receipt, StoreError>;
}

#[async_trait]
pub trait MerchantDirectory: Send + Sync {
    async fn profile(&self, merchant_id: &MerchantId) -> Result<Option<MerchantProfile>, StoreError>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Replace whatever is stored for `(merchantId, date)`.
    async fn put(&self, aggregate: &DailyAggregate) -> Result<(), StoreError>;

    async fn get(&self, merchant_id: &MerchantId, date: NaiveDate) -> Result<Option<DailyAggregate>, StoreError>;
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Upsert by session id.
    async fn put_batch(&self, sessions: &[ArchivedSession]) -> Result<(), StoreError>;

    async fn get(&self, id: &SessionId) -> Result<Option<ArchivedSession>, StoreError>;
}
