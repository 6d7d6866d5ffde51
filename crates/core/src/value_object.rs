//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Line items, sold-item rollups and merchant display fields have no identity
/// of their own; two of them with the same fields are interchangeable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
