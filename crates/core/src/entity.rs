//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Line items and payments are entities owned by an invoice aggregate; they are
/// never loaded or stored on their own.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
