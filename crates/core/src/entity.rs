//! Entity trait: identity + continuity across state changes.

/// A backend record with a stable identifier.
///
/// Record caches rely on this to keep at most one entry per identifier.
pub trait Entity {
    /// Strongly-typed record identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the record identifier.
    fn id(&self) -> &Self::Id;
}
