//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. The
/// validated names in [`crate::name`] are value objects: two `ProjectName`s with
/// the same text are the same project key.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
