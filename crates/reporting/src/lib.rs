//! `bilee-reporting`: per-merchant daily revenue rollups.
//!
//! Aggregates are always recomputed in full from the completed sessions of a
//! day; nothing here is incremental.

pub mod daily;
pub mod window;

pub use daily::{DailyAggregate, ItemSold, summarize};
pub use window::DayWindow;
