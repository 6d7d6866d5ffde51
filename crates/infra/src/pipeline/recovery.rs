use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use bilee_sessions::{PaymentStatus, SessionPatch, SessionStatus};

use super::lifecycle::complete_session;
use super::receipts::{ReceiptGenerator, ReceiptOutcome};
use crate::error::PipelineError;
use crate::store::{ReceiptCursor, ReceiptStore, SessionQuery, SessionStore};

/// Counts from one customer backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Repairs left behind by interrupted settlements and by receipts that
/// predate customer linking.
pub struct ReceiptRecovery {
    sessions: Arc<dyn SessionStore>,
    receipts: Arc<dyn ReceiptStore>,
    generator: ReceiptGenerator,
}

impl ReceiptRecovery {
    pub fn new(sessions: Arc<dyn SessionStore>, receipts: Arc<dyn ReceiptStore>, generator: ReceiptGenerator) -> Self {
        Self {
            sessions,
            receipts,
            generator,
        }
    }

    /// Settled sessions whose receipt link never landed: re-link the stored
    /// receipt, or generate one if none exists, then complete the session.
    /// Returns how many sessions were repaired.
    #[instrument(skip(self), err)]
    pub async fn repair_unlinked_sessions(&self, limit: usize) -> Result<usize, PipelineError> {
        let query = SessionQuery::new()
            .payment_status(PaymentStatus::Paid)
            .receipt_generated(false)
            .limit(limit);
        let unlinked = self.sessions.query(&query).await?;

        let mut repaired = 0;
        for session in unlinked {
            let linked = if let Some(receipt) = self.receipts.find_by_session(&session.id).await? {
                let link = SessionPatch::at(Utc::now()).receipt(receipt.receipt_id.clone());
                match self.sessions.update(&session.id, &link).await {
                    Ok(_) => {
                        info!(session_id = %session.id, receipt_id = %receipt.receipt_id, "receipt re-linked");
                        true
                    }
                    Err(err) => {
                        warn!(session_id = %session.id, error = %err, "receipt re-link failed");
                        false
                    }
                }
            } else {
                match self.generator.generate(&session.id, &session).await {
                    ReceiptOutcome::Created(_) | ReceiptOutcome::AlreadyExists(_) => true,
                    ReceiptOutcome::Skipped => false,
                    ReceiptOutcome::Failed(err) => {
                        warn!(session_id = %session.id, error = %err, "receipt regeneration failed");
                        false
                    }
                }
            };
            if !linked {
                continue;
            }

            repaired += 1;
            if let Err(err) = complete_session(self.sessions.as_ref(), &session.id).await {
                warn!(session_id = %session.id, error = %err, "completion after repair failed");
            }
        }

        info!(count = repaired, "unlinked sessions repaired");
        Ok(repaired)
    }

    /// Complete sessions that are paid and receipted but still `ACTIVE` or
    /// `PAID` because the completion write after settlement failed. Returns
    /// how many were completed.
    #[instrument(skip(self), err)]
    pub async fn complete_settled_sessions(&self, limit: usize) -> Result<usize, PipelineError> {
        let mut completed = 0;
        for status in [SessionStatus::Active, SessionStatus::Paid] {
            let remaining = limit.saturating_sub(completed);
            if remaining == 0 {
                break;
            }
            let query = SessionQuery::new()
                .status(status)
                .payment_status(PaymentStatus::Paid)
                .receipt_generated(true)
                .limit(remaining);

            for session in self.sessions.query(&query).await? {
                match complete_session(self.sessions.as_ref(), &session.id).await {
                    Ok(true) => completed += 1,
                    Ok(false) => {}
                    Err(err) => warn!(session_id = %session.id, error = %err, "session completion failed"),
                }
            }
        }

        info!(count = completed, "settled sessions completed");
        Ok(completed)
    }

    /// Fill `customerId` on receipts issued before customer linking existed,
    /// from the session's first connected customer.
    ///
    /// Walks every candidate in `(createdAt, receiptId)` order, `page_size`
    /// at a time. Walk-in sessions have no customer: their receipts are
    /// skipped and stay candidates for later runs, but never hold back the
    /// receipts behind them.
    #[instrument(skip(self), err)]
    pub async fn backfill_customer_ids(&self, page_size: usize) -> Result<BackfillReport, PipelineError> {
        let page_size = page_size.max(1);
        let mut report = BackfillReport::default();
        let mut cursor: Option<ReceiptCursor> = None;

        loop {
            let page = self.receipts.missing_customer(cursor.as_ref(), page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            let next = ReceiptCursor::of(last);
            let exhausted = page.len() < page_size;

            for receipt in page {
                let session = match self.sessions.get(&receipt.session_id).await {
                    Ok(Some(session)) => session,
                    Ok(None) => {
                        warn!(receipt_id = %receipt.receipt_id, session_id = %receipt.session_id, "receipt session not found");
                        report.failed += 1;
                        continue;
                    }
                    Err(err) => {
                        warn!(receipt_id = %receipt.receipt_id, error = %err, "session lookup failed");
                        report.failed += 1;
                        continue;
                    }
                };

                let Some(customer_id) = session.primary_customer() else {
                    report.skipped += 1;
                    continue;
                };

                match self.receipts.set_customer(&receipt.receipt_id, customer_id, Utc::now()).await {
                    Ok(_) => report.updated += 1,
                    Err(err) => {
                        warn!(receipt_id = %receipt.receipt_id, error = %err, "customer backfill failed");
                        report.failed += 1;
                    }
                }
            }

            if exhausted {
                break;
            }
            cursor = Some(next);
        }

        info!(
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "customer backfill finished"
        );
        Ok(report)
    }
}
