//! Change events and their delivery mechanics.
//!
//! Store writes are surfaced as explicit events and delivered through a
//! transport-agnostic bus to handlers. Nothing here assumes a particular
//! platform's trigger semantics: delivery is at-least-once and possibly out of
//! order, so every handler must be idempotent.

pub mod bus;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use handler::EventHandler;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
