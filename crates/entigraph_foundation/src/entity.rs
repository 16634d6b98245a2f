//! Entity handles with generational indices.

use std::fmt;

/// Handle to an entity record held by a cache.
///
/// Handles stay valid while the entity is attached and after it is detached,
/// so a caller can keep editing a detached entity and re-attach it later.
/// The generation counter changes when the cache releases a record's slot,
/// which lets the cache reject handles that outlived their record.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    /// Index into the cache arena.
    pub index: u32,
    /// Generation counter for stale handle detection.
    pub generation: u32,
}

impl EntityId {
    /// Creates a new handle with the given index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.index)
    }
}
