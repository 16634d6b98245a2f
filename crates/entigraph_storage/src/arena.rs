//! Slot allocation for cache records with generational indices.
//!
//! The `Arena` hands out [`EntityId`] handles and tracks generations to
//! detect handles whose record has been released.

use entigraph_foundation::{EntityId, Error, Result};

/// Allocates record slots and tracks their generations.
///
/// Slots are reused from a free list when available. Releasing a slot
/// increments its generation, so handles issued before the release no
/// longer validate.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    /// Generation counter for each slot.
    /// Even generations are free, odd generations are live.
    generations: Vec<u32>,
    /// Free list of slots available for reuse.
    free_list: Vec<u32>,
    /// Count of live slots.
    live_count: usize,
}

impl Arena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot and returns its handle.
    ///
    /// Reuses slots from the free list when available.
    pub fn allocate(&mut self) -> EntityId {
        self.live_count += 1;

        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            // Was even/free, now odd/live
            self.generations[idx] += 1;
            EntityId::new(index, self.generations[idx])
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let index = self.generations.len() as u32;
            // New slots start at generation 1 (odd = live)
            self.generations.push(1);
            EntityId::new(index, 1)
        }
    }

    /// Releases a slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or was never issued.
    pub fn release(&mut self, id: EntityId) -> Result<()> {
        self.validate(id)?;

        let idx = id.index as usize;
        // Was odd/live, now even/free
        self.generations[idx] += 1;
        self.free_list.push(id.index);
        self.live_count -= 1;

        Ok(())
    }

    /// Checks if a handle refers to a live slot.
    #[must_use]
    pub fn exists(&self, id: EntityId) -> bool {
        self.generations
            .get(id.index as usize)
            .is_some_and(|&g| g == id.generation && g % 2 == 1)
    }

    /// Validates that a handle refers to a live slot.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` if the slot was released since the handle was
    /// issued, or `NotFound` if the handle was never issued.
    pub fn validate(&self, id: EntityId) -> Result<()> {
        let Some(&current) = self.generations.get(id.index as usize) else {
            return Err(Error::entity_not_found(id));
        };

        if current != id.generation {
            return Err(Error::stale_entity(id));
        }

        if current % 2 == 0 {
            return Err(Error::entity_not_found(id));
        }

        Ok(())
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns true if no slots are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }
}
