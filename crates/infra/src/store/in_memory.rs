//! In-memory stores for tests, development and single-process deployments.
//!
//! Each store guards its map with one `RwLock`; every write takes the write
//! lock for its whole duration, which is what makes `update_batch` and
//! `insert_if_absent` atomic here.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use bilee_core::{CustomerId, MerchantId, ReceiptId, SessionId};
use bilee_receipts::{MerchantProfile, Receipt};
use bilee_reporting::DailyAggregate;
use bilee_sessions::{BillingSession, SessionPatch};

use super::{
    AggregateStore, ArchiveStore, ArchivedSession, InsertOutcome, MerchantDirectory, ReceiptCursor, ReceiptStore,
    SessionChange, SessionQuery, SessionStore,
};
use crate::error::StoreError;

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<BTreeMap<SessionId, BillingSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: BillingSession) -> Result<BillingSession, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<BillingSession>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(id).cloned())
    }

    async fn update(&self, id: &SessionId, patch: &SessionPatch) -> Result<SessionChange, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let current = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        let before = current.clone();
        let mut after = before.clone();
        after.apply_patch(patch)?;
        *current = after.clone();
        Ok(SessionChange { before, after })
    }

    async fn update_batch(
        &self,
        updates: &[(SessionId, SessionPatch)],
    ) -> Result<Vec<SessionChange>, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;

        // Stage every change first so a rejected document leaves the map untouched.
        let mut staged: BTreeMap<SessionId, SessionChange> = BTreeMap::new();
        for (id, patch) in updates {
            let base = match staged.get(id) {
                Some(change) => change.after.clone(),
                None => sessions
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?,
            };
            let mut after = base.clone();
            after.apply_patch(patch)?;
            let before = staged.remove(id).map(|c| c.before).unwrap_or(base);
            staged.insert(id.clone(), SessionChange { before, after });
        }

        let mut changes = Vec::with_capacity(staged.len());
        for (id, change) in staged {
            sessions.insert(id, change.after.clone());
            changes.push(change);
        }
        Ok(changes)
    }

    async fn delete_batch(&self, ids: &[SessionId]) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        Ok(ids.iter().filter(|id| sessions.remove(*id).is_some()).count())
    }

    async fn query(&self, query: &SessionQuery) -> Result<Vec<BillingSession>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions
            .values()
            .filter(|s| query.matches(s))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct ReceiptTables {
    by_id: HashMap<ReceiptId, Receipt>,
    by_session: HashMap<SessionId, ReceiptId>,
}

#[derive(Debug, Default)]
pub struct InMemoryReceiptStore {
    inner: RwLock<ReceiptTables>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Receipt> {
        self.inner
            .read()
            .map(|t| t.by_id.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn insert_if_absent(&self, receipt: Receipt) -> Result<InsertOutcome<Receipt>, StoreError> {
        let mut tables = self.inner.write().map_err(|_| poisoned())?;
        if let Some(existing) = tables
            .by_session
            .get(&receipt.session_id)
            .and_then(|id| tables.by_id.get(id))
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if tables.by_id.contains_key(&receipt.receipt_id) {
            return Err(StoreError::Conflict(format!("receipt id {} already used", receipt.receipt_id)));
        }
        tables
            .by_session
            .insert(receipt.session_id.clone(), receipt.receipt_id.clone());
        tables.by_id.insert(receipt.receipt_id.clone(), receipt.clone());
        Ok(InsertOutcome::Inserted(receipt))
    }

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<Receipt>, StoreError> {
        let tables = self.inner.read().map_err(|_| poisoned())?;
        Ok(tables
            .by_session
            .get(session_id)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn get(&self, id: &ReceiptId) -> Result<Option<Receipt>, StoreError> {
        let tables = self.inner.read().map_err(|_| poisoned())?;
        Ok(tables.by_id.get(id).cloned())
    }

    async fn missing_customer(
        &self,
        after: Option<&ReceiptCursor>,
        limit: usize,
    ) -> Result<Vec<Receipt>, StoreError> {
        let tables = self.inner.read().map_err(|_| poisoned())?;
        let mut receipts: Vec<Receipt> = tables
            .by_id
            .values()
            .filter(|r| r.customer_id.is_none())
            .filter(|r| after.is_none_or(|cursor| &ReceiptCursor::of(r) > cursor))
            .cloned()
            .collect();
        receipts.sort_by_key(ReceiptCursor::of);
        receipts.truncate(limit);
        Ok(receipts)
    }

    async fn set_customer(
        &self,
        id: &ReceiptId,
        customer_id: &CustomerId,
        at: DateTime<Utc>,
    ) -> Result<Receipt, StoreError> {
        let mut tables = self.inner.write().map_err(|_| poisoned())?;
        let receipt = tables
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("receipt {id}")))?;
        receipt.backfill_customer(customer_id.clone(), at)?;
        Ok(receipt.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMerchantDirectory {
    profiles: RwLock<HashMap<MerchantId, MerchantProfile>>,
}

impl InMemoryMerchantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, merchant_id: MerchantId, profile: MerchantProfile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(merchant_id, profile);
        }
    }
}

#[async_trait]
impl MerchantDirectory for InMemoryMerchantDirectory {
    async fn profile(&self, merchant_id: &MerchantId) -> Result<Option<MerchantProfile>, StoreError> {
        let profiles = self.profiles.read().map_err(|_| poisoned())?;
        Ok(profiles.get(merchant_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    aggregates: RwLock<HashMap<(MerchantId, NaiveDate), DailyAggregate>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn put(&self, aggregate: &DailyAggregate) -> Result<(), StoreError> {
        let mut aggregates = self.aggregates.write().map_err(|_| poisoned())?;
        aggregates.insert((aggregate.merchant_id.clone(), aggregate.date), aggregate.clone());
        Ok(())
    }

    async fn get(&self, merchant_id: &MerchantId, date: NaiveDate) -> Result<Option<DailyAggregate>, StoreError> {
        let aggregates = self.aggregates.read().map_err(|_| poisoned())?;
        Ok(aggregates.get(&(merchant_id.clone(), date)).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryArchiveStore {
    archived: RwLock<HashMap<SessionId, ArchivedSession>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.archived.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn put_batch(&self, sessions: &[ArchivedSession]) -> Result<(), StoreError> {
        let mut archived = self.archived.write().map_err(|_| poisoned())?;
        for entry in sessions {
            archived.insert(entry.session.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<ArchivedSession>, StoreError> {
        let archived = self.archived.read().map_err(|_| poisoned())?;
        Ok(archived.get(id).cloned())
    }
}
