use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use bilee_sessions::{SessionPatch, SessionStatus};

use crate::error::PipelineError;
use crate::store::{ArchiveStore, ArchivedSession, SessionQuery, SessionStore};

/// Scheduled retirement of sessions by age.
///
/// Each run handles at most one batch; a backlog drains over successive runs.
/// Both operations are idempotent per document, so a run that fails part way
/// is safe to repeat.
pub struct RetentionSweeper {
    sessions: Arc<dyn SessionStore>,
    archive: Arc<dyn ArchiveStore>,
    batch_limit: usize,
    /// `None` when the period is too long to represent; nothing is ever old enough then.
    retention: Option<Duration>,
}

impl RetentionSweeper {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        archive: Arc<dyn ArchiveStore>,
        batch_limit: usize,
        retention_days: i64,
    ) -> Self {
        Self {
            sessions,
            archive,
            batch_limit,
            retention: Duration::try_days(retention_days.max(0)),
        }
    }

    /// Move overdue `ACTIVE` sessions to `EXPIRED`. Returns how many moved.
    #[instrument(skip(self), err)]
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let query = SessionQuery::new()
            .status(SessionStatus::Active)
            .expires_before(now)
            .limit(self.batch_limit);
        let overdue = self.sessions.query(&query).await?;
        if overdue.is_empty() {
            return Ok(0);
        }

        let updates: Vec<_> = overdue
            .into_iter()
            .map(|s| (s.id, SessionPatch::at(now).status(SessionStatus::Expired)))
            .collect();
        let changed = self.sessions.update_batch(&updates).await?.len();

        info!(count = changed, "expired overdue sessions");
        Ok(changed)
    }

    /// Copy long-expired sessions to the archive, then delete them from the
    /// live store. Returns how many were archived.
    ///
    /// Copy comes first: a crash between the two steps leaves a duplicate
    /// that the next run overwrites and deletes, never a lost session.
    #[instrument(skip(self), err)]
    pub async fn archive_stale(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let Some(cutoff) = self.retention.and_then(|r| now.checked_sub_signed(r)) else {
            return Ok(0);
        };
        let query = SessionQuery::new()
            .status(SessionStatus::Expired)
            .expires_before(cutoff)
            .limit(self.batch_limit);
        let stale = self.sessions.query(&query).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut copies = Vec::with_capacity(stale.len());
        for mut session in stale {
            session.apply_patch(&SessionPatch::at(now).status(SessionStatus::Archived))?;
            copies.push(ArchivedSession {
                session,
                archived_at: now,
            });
        }
        self.archive.put_batch(&copies).await?;

        let ids: Vec<_> = copies.iter().map(|c| c.session.id.clone()).collect();
        let deleted = self.sessions.delete_batch(&ids).await?;

        info!(count = copies.len(), deleted, "archived stale sessions");
        Ok(copies.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilee_core::{MerchantId, SessionId};
    use bilee_sessions::{BillingSession, PaymentStatus};
    use rust_decimal_macros::dec;

    use crate::store::{InMemoryArchiveStore, InMemorySessionStore};

    fn session(id: &str, status: SessionStatus, expires_at: DateTime<Utc>) -> BillingSession {
        let created = expires_at - Duration::minutes(30);
        BillingSession {
            id: SessionId::new(id).unwrap(),
            merchant_id: MerchantId::new("m1").unwrap(),
            status,
            payment_status: PaymentStatus::Pending,
            payment_confirmed: false,
            items: vec![],
            subtotal: dec!(1),
            tax: dec!(0),
            total: dec!(1),
            payment_method: None,
            transaction_id: None,
            connected_customers: vec![],
            created_at: created,
            expires_at,
            completed_at: None,
            updated_at: created,
            payment_time: None,
            receipt_generated: false,
            receipt_id: None,
        }
    }

    fn sweeper(batch_limit: usize) -> (Arc<InMemorySessionStore>, Arc<InMemoryArchiveStore>, RetentionSweeper) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let archive = Arc::new(InMemoryArchiveStore::new());
        let sweeper = RetentionSweeper::new(sessions.clone(), archive.clone(), batch_limit, 30);
        (sessions, archive, sweeper)
    }

    #[tokio::test]
    async fn overdue_session_expires_once() {
        let (sessions, _, sweeper) = sweeper(500);
        let now = Utc::now();
        sessions
            .create(session("late", SessionStatus::Active, now - Duration::seconds(1)))
            .await
            .unwrap();
        sessions
            .create(session("fresh", SessionStatus::Active, now + Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 1);
        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 0);

        let late = sessions.get(&SessionId::new("late").unwrap()).await.unwrap().unwrap();
        let fresh = sessions.get(&SessionId::new("fresh").unwrap()).await.unwrap().unwrap();
        assert_eq!(late.status, SessionStatus::Expired);
        assert_eq!(fresh.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn one_batch_per_run() {
        let (sessions, _, sweeper) = sweeper(2);
        let now = Utc::now();
        for i in 0..5 {
            sessions
                .create(session(&format!("s{i}"), SessionStatus::Active, now - Duration::minutes(1)))
                .await
                .unwrap();
        }

        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 2);
        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 2);
        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 1);
        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_expired_sessions_move_to_archive() {
        let (sessions, archive, sweeper) = sweeper(500);
        let now = Utc::now();
        sessions
            .create(session("old", SessionStatus::Expired, now - Duration::days(31)))
            .await
            .unwrap();
        sessions
            .create(session("recent", SessionStatus::Expired, now - Duration::days(29)))
            .await
            .unwrap();
        sessions
            .create(session("old_active", SessionStatus::Active, now - Duration::days(40)))
            .await
            .unwrap();

        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 1);

        let old = SessionId::new("old").unwrap();
        assert!(sessions.get(&old).await.unwrap().is_none());
        let copy = archive.get(&old).await.unwrap().unwrap();
        assert_eq!(copy.session.status, SessionStatus::Archived);
        assert_eq!(copy.archived_at, now);
        assert!(sessions.get(&SessionId::new("recent").unwrap()).await.unwrap().is_some());
        assert!(sessions.get(&SessionId::new("old_active").unwrap()).await.unwrap().is_some());
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn archive_drains_backlog_one_batch_per_run() {
        let (sessions, archive, sweeper) = sweeper(2);
        let now = Utc::now();
        for i in 0..5 {
            sessions
                .create(session(&format!("s{i}"), SessionStatus::Expired, now - Duration::days(31)))
                .await
                .unwrap();
        }

        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 2);
        assert_eq!(archive.len(), 2);
        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 2);
        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 1);
        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 0);

        assert_eq!(archive.len(), 5);
        let live = sessions.query(&SessionQuery::new()).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_retention_never_archives() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let archive = Arc::new(InMemoryArchiveStore::new());
        let sweeper = RetentionSweeper::new(sessions.clone(), archive.clone(), 10, i64::MAX);
        let now = Utc::now();
        sessions
            .create(session("ancient", SessionStatus::Expired, now - Duration::days(3650)))
            .await
            .unwrap();

        assert_eq!(sweeper.archive_stale(now).await.unwrap(), 0);
        assert_eq!(archive.len(), 0);
    }
}
