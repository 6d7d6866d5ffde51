use async_trait::async_trait;

use bilee_core::SessionId;
use bilee_events::{Event, EventBus};
use bilee_sessions::{BillingSession, SessionEvent, SessionPatch};

use super::{SessionChange, SessionQuery, SessionStore};
use crate::error::StoreError;

/// Session store decorator that turns successful writes into change events.
///
/// This is the explicit replacement for "trigger on document write": a
/// create publishes `SessionEvent::Observed`, every changed document in an
/// update publishes `SessionEvent::Mutated`. Nothing is published for a write
/// that failed. A publish failure is logged; the write itself stands.
pub struct PublishingSessionStore<S, B> {
    inner: S,
    bus: B,
}

impl<S, B> PublishingSessionStore<S, B> {
    pub fn new(inner: S, bus: B) -> Self {
        Self { inner, bus }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, B> PublishingSessionStore<S, B>
where
    B: EventBus<SessionEvent>,
{
    fn emit(&self, event: SessionEvent) {
        let event_type = event.event_type();
        let session_id = event.current().id.clone();
        if let Err(err) = self.bus.publish(event) {
            tracing::warn!(%session_id, event_type, error = ?err, "failed to publish session event");
        }
    }
}

#[async_trait]
impl<S, B> SessionStore for PublishingSessionStore<S, B>
where
    S: SessionStore,
    B: EventBus<SessionEvent>,
{
    async fn create(&self, session: BillingSession) -> Result<BillingSession, StoreError> {
        let created = self.inner.create(session).await?;
        self.emit(SessionEvent::created(created.clone()));
        Ok(created)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<BillingSession>, StoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &SessionId, patch: &SessionPatch) -> Result<SessionChange, StoreError> {
        let change = self.inner.update(id, patch).await?;
        self.emit(SessionEvent::mutated(change.before.clone(), change.after.clone()));
        Ok(change)
    }

    async fn update_batch(
        &self,
        updates: &[(SessionId, SessionPatch)],
    ) -> Result<Vec<SessionChange>, StoreError> {
        let changes = self.inner.update_batch(updates).await?;
        for change in &changes {
            self.emit(SessionEvent::mutated(change.before.clone(), change.after.clone()));
        }
        Ok(changes)
    }

    async fn delete_batch(&self, ids: &[SessionId]) -> Result<usize, StoreError> {
        self.inner.delete_batch(ids).await
    }

    async fn query(&self, query: &SessionQuery) -> Result<Vec<BillingSession>, StoreError> {
        self.inner.query(query).await
    }
}
