//! `bilee-core`: foundation building blocks for the settlement pipeline.
//!
//! Pure domain primitives only (no IO, no storage).

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, MerchantId, ReceiptId, SessionId};
pub use money::{Amount, CURRENCY_SCALE, amount_from_json, to_currency_precision, within_tolerance};
pub use value_object::ValueObject;
