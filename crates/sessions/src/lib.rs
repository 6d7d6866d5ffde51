//! `bilee-sessions`: billing session documents and their lifecycle rules.
//!
//! Pure domain logic only: status ordering, field-level patches, change
//! events and the settlement decision. Storage lives in `bilee-infra`.

pub mod lifecycle;
pub mod session;

pub use lifecycle::{LifecycleDecision, SessionEvent, completion_patch, confirmation_patch, decide, just_confirmed};
pub use session::{BillingSession, LineItem, NewSession, PaymentStatus, SessionPatch, SessionStatus};
