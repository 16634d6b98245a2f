//! Entity change-tracking states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Change-tracking state of an entity relative to a cache.
///
/// Only `Detached` entities are outside every cache; the other four are
/// attached states. `Added`, `Modified`, and `Deleted` are the "changed"
/// states that pending-change queries report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not attached to any cache.
    Detached,
    /// New since the last accept; would be inserted on save.
    Added,
    /// Loaded or accepted, with no pending edits.
    Unchanged,
    /// Has pending edits relative to its original values.
    Modified,
    /// Marked for deletion; would be removed on save.
    Deleted,
}

impl EntityState {
    /// All states, in declaration order.
    pub const ALL: [EntityState; 5] = [
        Self::Detached,
        Self::Added,
        Self::Unchanged,
        Self::Modified,
        Self::Deleted,
    ];

    /// Returns true if the entity is outside any cache.
    #[must_use]
    pub const fn is_detached(self) -> bool {
        matches!(self, Self::Detached)
    }

    /// Returns true for `Added`.
    #[must_use]
    pub const fn is_added(self) -> bool {
        matches!(self, Self::Added)
    }

    /// Returns true for `Unchanged`.
    #[must_use]
    pub const fn is_unchanged(self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Returns true for `Modified`.
    #[must_use]
    pub const fn is_modified(self) -> bool {
        matches!(self, Self::Modified)
    }

    /// Returns true for `Deleted`.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Returns true for `Added`, `Modified`, or `Deleted`.
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    /// Returns true when the entity belongs to a cache.
    #[must_use]
    pub const fn is_attached(self) -> bool {
        !self.is_detached()
    }

    /// Parses a state from its name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Returns the state's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Detached => "Detached",
            Self::Added => "Added",
            Self::Unchanged => "Unchanged",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
