//! Settlement pipeline components.
//!
//! Each component holds its stores as `Arc<dyn …>` and returns errors to its
//! caller; none of them retries internally.

pub mod aggregation;
pub mod idempotency;
pub mod lifecycle;
pub mod receipts;
pub mod recovery;
pub mod retention;
pub mod webhook;

pub use aggregation::AggregationEngine;
pub use idempotency::{Claim, IdempotencyGuard};
pub use lifecycle::SessionLifecycleManager;
pub use receipts::{ReceiptGenerator, ReceiptOutcome};
pub use recovery::{BackfillReport, ReceiptRecovery};
pub use retention::RetentionSweeper;
pub use webhook::{
    HmacSha256Scheme, PspStatus, SIGNATURE_HEADER, SignatureScheme, VerifiedPayment, WebhookRejection,
    WebhookVerifier,
};
