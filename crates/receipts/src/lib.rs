//! `bilee-receipts`: customer-facing receipt records.
//!
//! Deterministic construction of a receipt from a settled session and the
//! merchant's display profile (no IO, no storage).

pub mod merchant;
pub mod receipt;

pub use merchant::{DEFAULT_MERCHANT_NAME, MerchantCategory, MerchantProfile};
pub use receipt::Receipt;
