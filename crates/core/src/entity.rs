//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Billing sessions and receipts are entities: two documents with the same
/// id are the same record, whatever their field values.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
