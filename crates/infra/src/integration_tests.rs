//! End-to-end pipeline tests over the in-memory backends.
//!
//! Path under test: PublishingSessionStore → InMemoryEventBus →
//! SessionEventWorker → SessionLifecycleManager → ReceiptGenerator, with the
//! webhook verifier, aggregation and sweeps acting on the same stores.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::runtime::Handle;

    use bilee_core::{CustomerId, MerchantId, SessionId};
    use bilee_events::InMemoryEventBus;
    use bilee_sessions::{BillingSession, LineItem, NewSession, PaymentStatus, SessionEvent, SessionStatus};

    use crate::pipeline::{
        AggregationEngine, HmacSha256Scheme, IdempotencyGuard, ReceiptGenerator, RetentionSweeper,
        SessionLifecycleManager, WebhookVerifier,
    };
    use crate::store::{
        InMemoryAggregateStore, InMemoryArchiveStore, InMemoryMerchantDirectory, InMemoryReceiptStore,
        InMemorySessionStore, PublishingSessionStore, ReceiptStore, SessionStore,
    };
    use crate::workers::{SessionEventWorker, WorkerHandle};

    const SECRET: &str = "integration-secret";

    type Bus = Arc<InMemoryEventBus<SessionEvent>>;

    struct Pipeline {
        sessions: Arc<dyn SessionStore>,
        receipts: Arc<InMemoryReceiptStore>,
        aggregates: Arc<InMemoryAggregateStore>,
        archive: Arc<InMemoryArchiveStore>,
        webhook: WebhookVerifier,
        scheme: HmacSha256Scheme,
        worker: WorkerHandle,
    }

    fn pipeline() -> Pipeline {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sessions: Arc<dyn SessionStore> =
            Arc::new(PublishingSessionStore::new(InMemorySessionStore::new(), bus.clone()));
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let generator = ReceiptGenerator::new(
            IdempotencyGuard::new(receipts.clone()),
            sessions.clone(),
            Arc::new(InMemoryMerchantDirectory::new()),
        );
        let manager = Arc::new(SessionLifecycleManager::new(sessions.clone(), generator));
        let worker = SessionEventWorker::spawn("session-events-test", bus, manager, Handle::current()).unwrap();

        let scheme = HmacSha256Scheme::new(SECRET);
        let webhook = WebhookVerifier::new(sessions.clone(), Arc::new(scheme.clone()), dec!(0.01));

        Pipeline {
            sessions,
            receipts,
            aggregates: Arc::new(InMemoryAggregateStore::new()),
            archive: Arc::new(InMemoryArchiveStore::new()),
            webhook,
            scheme,
            worker,
        }
    }

    fn new_session(id: &str, status: SessionStatus, payment_status: PaymentStatus) -> BillingSession {
        BillingSession::open(
            NewSession {
                id: SessionId::new(id).unwrap(),
                merchant_id: MerchantId::new("merchant_1").unwrap(),
                status,
                payment_status,
                items: vec![LineItem {
                    name: "Masala Dosa".into(),
                    qty: 2,
                    unit_price: dec!(60),
                    line_total: dec!(120),
                }],
                subtotal: dec!(120),
                tax: dec!(6),
                total: dec!(126),
                payment_method: None,
                transaction_id: None,
                connected_customers: vec![CustomerId::new("cust_1").unwrap()],
                expires_at: Utc::now() + ChronoDuration::minutes(15),
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn wait_until_completed(sessions: &Arc<dyn SessionStore>, id: &SessionId) -> BillingSession {
        for _ in 0..500 {
            if let Some(s) = sessions.get(id).await.unwrap() {
                if s.status == SessionStatus::Completed && s.receipt_generated {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {id} was never settled");
    }

    fn webhook_body(session_id: &str, txn: &str, amount: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "session_id": session_id,
            "transaction_id": txn,
            "amount": amount,
            "status": "SUCCESS",
        }))
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn instant_checkout_flows_to_receipt() {
        let p = pipeline();
        let created = p
            .sessions
            .create(new_session("sess_walkin", SessionStatus::Paid, PaymentStatus::Paid))
            .await
            .unwrap();

        let settled = wait_until_completed(&p.sessions, &created.id).await;

        let receipt = p.receipts.find_by_session(&created.id).await.unwrap().unwrap();
        assert_eq!(settled.receipt_id, Some(receipt.receipt_id.clone()));
        assert_eq!(receipt.total, dec!(126));
        assert_eq!(receipt.customer_id, Some(CustomerId::new("cust_1").unwrap()));
        assert_eq!(receipt.merchant_name, "MY BUSINESS");

        p.worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn webhook_settlement_reaches_daily_aggregate() {
        let p = pipeline();
        let created = p
            .sessions
            .create(new_session("sess_upi", SessionStatus::Active, PaymentStatus::Pending))
            .await
            .unwrap();

        let body = webhook_body("sess_upi", "txn_42", json!(126.004));
        let signature = p.scheme.sign(&body);
        let payment = p.webhook.verify(Some(&signature), &body).await.unwrap();
        assert!(payment.applied);

        let settled = wait_until_completed(&p.sessions, &created.id).await;
        assert_eq!(settled.transaction_id.as_deref(), Some("txn_42"));
        assert!(settled.payment_confirmed);

        let engine = AggregationEngine::new(p.sessions.clone(), p.aggregates.clone(), FixedOffset::east_opt(0).unwrap());
        let completed_at = settled.completed_at.unwrap();
        let aggregate = engine
            .recompute(&settled.merchant_id, completed_at.date_naive())
            .await
            .unwrap();
        assert_eq!(aggregate.total, dec!(126));
        assert_eq!(aggregate.orders_count, 1);
        assert_eq!(aggregate.items_sold[0].name, "Masala Dosa");
        assert_eq!(aggregate.items_sold[0].qty, 2);

        p.worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn redelivered_webhook_yields_one_receipt() {
        let p = pipeline();
        let created = p
            .sessions
            .create(new_session("sess_dup", SessionStatus::Active, PaymentStatus::Pending))
            .await
            .unwrap();

        let body = webhook_body("sess_dup", "txn_7", json!(126));
        let signature = p.scheme.sign(&body);
        let first = p.webhook.verify(Some(&signature), &body).await.unwrap();
        let second = p.webhook.verify(Some(&signature), &body).await.unwrap();
        assert!(first.applied);
        assert!(!second.applied);

        wait_until_completed(&p.sessions, &created.id).await;
        assert_eq!(p.receipts.all().len(), 1);

        p.worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unpaid_session_expires_and_is_archived_without_receipt() {
        let p = pipeline();
        let created = p
            .sessions
            .create(new_session("sess_idle", SessionStatus::Active, PaymentStatus::Pending))
            .await
            .unwrap();
        let sweeper = RetentionSweeper::new(p.sessions.clone(), p.archive.clone(), 500, 30);

        let after_expiry = created.expires_at + ChronoDuration::seconds(1);
        assert_eq!(sweeper.expire_overdue(after_expiry).await.unwrap(), 1);
        assert_eq!(sweeper.expire_overdue(after_expiry).await.unwrap(), 0);

        let after_retention = created.expires_at + ChronoDuration::days(31);
        assert_eq!(sweeper.archive_stale(after_retention).await.unwrap(), 1);

        assert!(p.sessions.get(&created.id).await.unwrap().is_none());
        let archived = p.archive.len();
        assert_eq!(archived, 1);
        assert!(p.receipts.all().is_empty());

        p.worker.shutdown();
    }
}
