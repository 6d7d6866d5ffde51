use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use bilee_core::{ReceiptId, SessionId};
use bilee_receipts::Receipt;
use bilee_sessions::{BillingSession, SessionPatch};

use super::idempotency::{Claim, IdempotencyGuard};
use crate::error::PipelineError;
use crate::store::{MerchantDirectory, SessionStore};

/// Result of one receipt generation attempt.
#[derive(Debug)]
pub enum ReceiptOutcome {
    Created(Receipt),
    /// A receipt already exists for the session (found up front, or lost the
    /// race at insert time).
    AlreadyExists(ReceiptId),
    /// Payment is not settled; nothing to do.
    Skipped,
    Failed(PipelineError),
}

impl ReceiptOutcome {
    pub fn receipt_id(&self) -> Option<&ReceiptId> {
        match self {
            ReceiptOutcome::Created(r) => Some(&r.receipt_id),
            ReceiptOutcome::AlreadyExists(id) => Some(id),
            ReceiptOutcome::Skipped | ReceiptOutcome::Failed(_) => None,
        }
    }
}

/// Builds and persists the receipt of a settled session, exactly once.
#[derive(Clone)]
pub struct ReceiptGenerator {
    guard: IdempotencyGuard,
    sessions: Arc<dyn SessionStore>,
    merchants: Arc<dyn MerchantDirectory>,
}

impl ReceiptGenerator {
    pub fn new(
        guard: IdempotencyGuard,
        sessions: Arc<dyn SessionStore>,
        merchants: Arc<dyn MerchantDirectory>,
    ) -> Self {
        Self {
            guard,
            sessions,
            merchants,
        }
    }

    /// Generate the receipt for `session`.
    ///
    /// The receipt is written first and the session linked second; the two
    /// writes are not atomic. A crash in between leaves an unlinked session,
    /// which `ReceiptRecovery` repairs. Failures are returned, never retried.
    #[instrument(skip(self, session), fields(session_id = %session_id))]
    pub async fn generate(&self, session_id: &SessionId, session: &BillingSession) -> ReceiptOutcome {
        if &session.id != session_id {
            return ReceiptOutcome::Failed(PipelineError::Validation(format!(
                "session data belongs to {}",
                session.id
            )));
        }
        if !session.is_settled() {
            return ReceiptOutcome::Skipped;
        }

        match self.guard.existing(session_id).await {
            Ok(Some(existing)) => return ReceiptOutcome::AlreadyExists(existing),
            Ok(None) => {}
            Err(err) => return ReceiptOutcome::Failed(err.into()),
        }

        let profile = match self.merchants.profile(&session.merchant_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(merchant_id = %session.merchant_id, error = %err, "merchant lookup failed; using defaults");
                None
            }
        };

        let now = Utc::now();
        let receipt = match Receipt::issue(ReceiptId::generate(), session, profile.as_ref(), now) {
            Ok(receipt) => receipt,
            Err(err) => return ReceiptOutcome::Failed(err.into()),
        };

        let receipt = match self.guard.claim(receipt).await {
            Ok(Claim::Won(receipt)) => receipt,
            Ok(Claim::Lost(existing)) => {
                info!(receipt_id = %existing, "receipt already created by a concurrent settlement");
                return ReceiptOutcome::AlreadyExists(existing);
            }
            Err(err) => return ReceiptOutcome::Failed(err.into()),
        };

        let link = SessionPatch::at(now).receipt(receipt.receipt_id.clone());
        if let Err(err) = self.sessions.update(session_id, &link).await {
            warn!(
                receipt_id = %receipt.receipt_id,
                error = %err,
                "receipt stored but session link failed; left for recovery"
            );
            return ReceiptOutcome::Failed(err.into());
        }

        info!(receipt_id = %receipt.receipt_id, "receipt generated");
        ReceiptOutcome::Created(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilee_core::MerchantId;
    use bilee_receipts::MerchantProfile;
    use bilee_sessions::{NewSession, PaymentStatus, SessionStatus};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use crate::store::{InMemoryMerchantDirectory, InMemoryReceiptStore, InMemorySessionStore, ReceiptStore};

    struct Fixture {
        sessions: Arc<InMemorySessionStore>,
        receipts: Arc<InMemoryReceiptStore>,
        merchants: Arc<InMemoryMerchantDirectory>,
        generator: ReceiptGenerator,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(InMemorySessionStore::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let merchants = Arc::new(InMemoryMerchantDirectory::new());
        let generator = ReceiptGenerator::new(
            IdempotencyGuard::new(receipts.clone()),
            sessions.clone(),
            merchants.clone(),
        );
        Fixture {
            sessions,
            receipts,
            merchants,
            generator,
        }
    }

    async fn seed(f: &Fixture, payment_status: PaymentStatus) -> BillingSession {
        let now = Utc::now();
        let status = if payment_status == PaymentStatus::Paid {
            SessionStatus::Paid
        } else {
            SessionStatus::Active
        };
        let session = BillingSession::open(
            NewSession {
                id: SessionId::new("sess_1").unwrap(),
                merchant_id: MerchantId::new("m1").unwrap(),
                status,
                payment_status,
                items: vec![],
                subtotal: dec!(20),
                tax: dec!(0),
                total: dec!(20),
                payment_method: Some("cash".into()),
                transaction_id: None,
                connected_customers: vec![],
                expires_at: now + Duration::minutes(10),
            },
            now,
        )
        .unwrap();
        f.sessions.create(session).await.unwrap()
    }

    #[tokio::test]
    async fn unsettled_session_is_skipped() {
        let f = fixture();
        let session = seed(&f, PaymentStatus::Pending).await;
        let outcome = f.generator.generate(&session.id, &session).await;
        assert!(matches!(outcome, ReceiptOutcome::Skipped));
        assert!(f.receipts.all().is_empty());
    }

    #[tokio::test]
    async fn creates_receipt_and_links_session() {
        let f = fixture();
        f.merchants.insert(
            MerchantId::new("m1").unwrap(),
            MerchantProfile {
                business_name: Some("Chai Point".into()),
                category: Some("Restaurant".into()),
                ..MerchantProfile::default()
            },
        );
        let session = seed(&f, PaymentStatus::Paid).await;

        let outcome = f.generator.generate(&session.id, &session).await;
        let ReceiptOutcome::Created(receipt) = outcome else {
            panic!("expected a new receipt, got {outcome:?}");
        };
        assert_eq!(receipt.merchant_name, "Chai Point");

        let linked = f.sessions.get(&session.id).await.unwrap().unwrap();
        assert!(linked.receipt_generated);
        assert_eq!(linked.receipt_id, Some(receipt.receipt_id));
    }

    #[tokio::test]
    async fn second_generation_short_circuits() {
        let f = fixture();
        let session = seed(&f, PaymentStatus::Paid).await;

        let first = f.generator.generate(&session.id, &session).await;
        let second = f.generator.generate(&session.id, &session).await;

        assert_eq!(first.receipt_id(), second.receipt_id());
        assert!(matches!(second, ReceiptOutcome::AlreadyExists(_)));
        assert_eq!(f.receipts.all().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_settlements_produce_one_receipt() {
        let f = fixture();
        let session = seed(&f, PaymentStatus::Paid).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let generator = f.generator.clone();
            let session = session.clone();
            tasks.push(tokio::spawn(async move { generator.generate(&session.id, &session).await }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            let outcome = task.await.unwrap();
            ids.push(outcome.receipt_id().cloned().expect("every attempt resolves to a receipt"));
        }

        assert_eq!(f.receipts.all().len(), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let stored = f.receipts.find_by_session(&session.id).await.unwrap().unwrap();
        assert_eq!(ids[0], stored.receipt_id);
    }
}
