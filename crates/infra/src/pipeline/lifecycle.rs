use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use bilee_core::SessionId;
use bilee_events::{Event, EventHandler};
use bilee_sessions::{LifecycleDecision, SessionEvent, completion_patch, decide};

use super::receipts::{ReceiptGenerator, ReceiptOutcome};
use crate::error::{PipelineError, StoreError};
use crate::store::SessionStore;

/// Reacts to session change events: settles paid sessions.
///
/// Settlement means generating the receipt and then moving the session to
/// `COMPLETED` when that is still a forward step. Backward status changes are
/// logged and dropped, never propagated.
pub struct SessionLifecycleManager {
    sessions: Arc<dyn SessionStore>,
    receipts: ReceiptGenerator,
}

impl SessionLifecycleManager {
    pub fn new(sessions: Arc<dyn SessionStore>, receipts: ReceiptGenerator) -> Self {
        Self { sessions, receipts }
    }
}

/// Move a settled session to `COMPLETED` if that is still a forward step.
/// Returns whether this call completed it.
pub(super) async fn complete_session(
    sessions: &dyn SessionStore,
    session_id: &SessionId,
) -> Result<bool, PipelineError> {
    // Decide against the stored state, not the event snapshot.
    let Some(current) = sessions.get(session_id).await? else {
        return Ok(false);
    };
    let Some(patch) = completion_patch(&current, Utc::now()) else {
        return Ok(false);
    };
    match sessions.update(session_id, &patch).await {
        Ok(_) => {
            info!(%session_id, "session completed");
            Ok(true)
        }
        // Lost a race with the sweeper or another completion.
        Err(StoreError::Rejected(err)) => {
            warn!(%session_id, error = %err, "session could not be completed");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl EventHandler<SessionEvent> for SessionLifecycleManager {
    type Error = PipelineError;

    #[instrument(skip_all, fields(event_type = event.event_type(), session_id = %event.current().id))]
    async fn handle(&self, event: SessionEvent) -> Result<(), Self::Error> {
        let session = match decide(&event) {
            LifecycleDecision::Ignore => return Ok(()),
            LifecycleDecision::Regression { from, to } => {
                warn!(%from, %to, "dropping event with backward status change");
                return Ok(());
            }
            LifecycleDecision::Settle(session) => session,
        };

        let outcome = self.receipts.generate(&session.id, &session).await;
        match &outcome {
            ReceiptOutcome::Created(_) | ReceiptOutcome::Skipped => {}
            ReceiptOutcome::AlreadyExists(receipt_id) => debug!(%receipt_id, "receipt already exists"),
            ReceiptOutcome::Failed(err) => error!(error = %err, "receipt generation failed"),
        }

        // Completion does not wait on the receipt: revenue must reach the
        // aggregates even if the receipt has to be repaired later. A failed
        // write here is picked up by `ReceiptRecovery::complete_settled_sessions`.
        complete_session(self.sessions.as_ref(), &session.id).await?;

        match outcome {
            ReceiptOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilee_core::MerchantId;
    use bilee_sessions::{BillingSession, NewSession, PaymentStatus, SessionPatch, SessionStatus};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use crate::pipeline::IdempotencyGuard;
    use crate::store::{InMemoryMerchantDirectory, InMemoryReceiptStore, InMemorySessionStore};

    fn manager() -> (Arc<InMemorySessionStore>, Arc<InMemoryReceiptStore>, SessionLifecycleManager) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let generator = ReceiptGenerator::new(
            IdempotencyGuard::new(receipts.clone()),
            sessions.clone(),
            Arc::new(InMemoryMerchantDirectory::new()),
        );
        let manager = SessionLifecycleManager::new(sessions.clone(), generator);
        (sessions, receipts, manager)
    }

    fn new_session(status: SessionStatus, payment_status: PaymentStatus) -> NewSession {
        NewSession {
            id: SessionId::new("sess_1").unwrap(),
            merchant_id: MerchantId::new("m1").unwrap(),
            status,
            payment_status,
            items: vec![],
            subtotal: dec!(10),
            tax: dec!(0),
            total: dec!(10),
            payment_method: None,
            transaction_id: None,
            connected_customers: vec![],
            expires_at: Utc::now() + Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn instant_checkout_is_settled_and_completed() {
        let (sessions, receipts, manager) = manager();
        let created = sessions
            .create(BillingSession::open(new_session(SessionStatus::Paid, PaymentStatus::Paid), Utc::now()).unwrap())
            .await
            .unwrap();

        manager.handle(SessionEvent::created(created.clone())).await.unwrap();

        let stored = sessions.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(stored.receipt_generated);
        assert_eq!(receipts.all().len(), 1);
    }

    #[tokio::test]
    async fn payment_confirmation_settles_once_even_when_redelivered() {
        let (sessions, receipts, manager) = manager();
        let created = sessions
            .create(BillingSession::open(new_session(SessionStatus::Active, PaymentStatus::Pending), Utc::now()).unwrap())
            .await
            .unwrap();
        let change = sessions
            .update(
                &created.id,
                &SessionPatch::at(Utc::now())
                    .payment_status(PaymentStatus::Paid)
                    .payment_confirmed(true),
            )
            .await
            .unwrap();

        let event = SessionEvent::mutated(change.before, change.after);
        manager.handle(event.clone()).await.unwrap();
        manager.handle(event).await.unwrap();

        assert_eq!(receipts.all().len(), 1);
        let stored = sessions.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn late_payment_on_expired_session_keeps_status_but_gets_receipt() {
        let (sessions, receipts, manager) = manager();
        let created = sessions
            .create(BillingSession::open(new_session(SessionStatus::Active, PaymentStatus::Pending), Utc::now()).unwrap())
            .await
            .unwrap();
        sessions
            .update(&created.id, &SessionPatch::at(Utc::now()).status(SessionStatus::Expired))
            .await
            .unwrap();
        let change = sessions
            .update(&created.id, &SessionPatch::at(Utc::now()).payment_status(PaymentStatus::Paid))
            .await
            .unwrap();

        manager
            .handle(SessionEvent::mutated(change.before, change.after))
            .await
            .unwrap();

        let stored = sessions.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert_eq!(receipts.all().len(), 1);
    }

    #[tokio::test]
    async fn regression_is_dropped_without_error() {
        let (sessions, receipts, manager) = manager();
        let mut before = BillingSession::open(new_session(SessionStatus::Active, PaymentStatus::Pending), Utc::now()).unwrap();
        before.status = SessionStatus::Completed;
        let mut after = before.clone();
        after.status = SessionStatus::Active;
        after.payment_status = PaymentStatus::Paid;

        manager.handle(SessionEvent::mutated(before, after)).await.unwrap();

        assert!(receipts.all().is_empty());
        assert!(sessions.is_empty());
    }
}
