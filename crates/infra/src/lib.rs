//! Infrastructure layer: stores, the settlement pipeline, background workers
//! and configuration.
//!
//! Domain crates stay pure; everything that touches a store, a clock or a
//! secret lives here.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, Environment, PipelineConfig};
pub use error::{ErrorKind, PipelineError, StoreError};
