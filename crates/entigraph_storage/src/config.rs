//! Cache configuration and per-operation options.

use entigraph_foundation::EntityState;
use serde::{Deserialize, Serialize};

/// How an incoming entity is reconciled with an attached entity of the same key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Keep local pending changes; overwrite only unchanged entities.
    #[default]
    PreserveChanges,
    /// Replace local values and state with the incoming ones.
    OverwriteChanges,
    /// Leave the local entity untouched.
    SkipMerge,
    /// Refuse the merge with an integrity violation.
    Disallowed,
}

/// Cache-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Merge strategy for remote query results.
    pub query_merge_strategy: MergeStrategy,
    /// Magnitude of the first numeric temporary key.
    pub temp_key_seed: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_merge_strategy: MergeStrategy::PreserveChanges,
            temp_key_seed: 1,
        }
    }
}

impl CacheConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query merge strategy.
    #[must_use]
    pub fn with_query_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.query_merge_strategy = strategy;
        self
    }

    /// Sets the first numeric temporary key magnitude.
    #[must_use]
    pub fn with_temp_key_seed(mut self, seed: i64) -> Self {
        self.temp_key_seed = seed;
        self
    }
}

/// Options for creating an entity through a cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CreateOptions {
    /// State the new entity is attached with; `Detached` leaves it unattached.
    pub state: EntityState,
    /// When set, a key collision merges into the attached entity instead of failing.
    pub merge_strategy: Option<MergeStrategy>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            state: EntityState::Added,
            merge_strategy: None,
        }
    }
}

impl CreateOptions {
    /// Options that attach with the given state.
    #[must_use]
    pub fn with_state(state: EntityState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Sets the collision merge strategy.
    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }
}
