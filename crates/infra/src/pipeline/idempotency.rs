use std::sync::Arc;

use bilee_core::{ReceiptId, SessionId};
use bilee_receipts::Receipt;

use crate::error::StoreError;
use crate::store::{InsertOutcome, ReceiptStore};

/// Result of trying to claim the receipt slot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Our receipt was written.
    Won(Receipt),
    /// Another receipt already holds the slot; ours was discarded.
    Lost(ReceiptId),
}

/// Guarantees at most one receipt per session.
///
/// `existing` is a cheap pre-check. The guarantee itself comes from `claim`,
/// which relies on the store's atomic create-if-absent keyed by session id,
/// so two concurrent settlements of one session cannot both win.
#[derive(Clone)]
pub struct IdempotencyGuard {
    receipts: Arc<dyn ReceiptStore>,
}

impl IdempotencyGuard {
    pub fn new(receipts: Arc<dyn ReceiptStore>) -> Self {
        Self { receipts }
    }

    pub async fn existing(&self, session_id: &SessionId) -> Result<Option<ReceiptId>, StoreError> {
        Ok(self
            .receipts
            .find_by_session(session_id)
            .await?
            .map(|r| r.receipt_id))
    }

    pub async fn claim(&self, receipt: Receipt) -> Result<Claim, StoreError> {
        match self.receipts.insert_if_absent(receipt).await? {
            InsertOutcome::Inserted(receipt) => Ok(Claim::Won(receipt)),
            InsertOutcome::Existing(existing) => Ok(Claim::Lost(existing.receipt_id)),
        }
    }
}
