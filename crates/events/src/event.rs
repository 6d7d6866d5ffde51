use chrono::{DateTime, Utc};

/// A domain-agnostic change event.
///
/// Events are immutable facts about something that already happened in a
/// store (a document was created or mutated).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "session.observed").
    fn event_type(&self) -> &'static str;

    /// When the underlying change happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
