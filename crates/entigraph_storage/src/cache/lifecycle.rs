//! Entity lifecycle: creation, attachment, state transitions, and
//! accepting or rejecting changes.

use std::sync::Arc;

use entigraph_foundation::{EntityId, EntityKey, EntityState, Error, ErrorKind, Result};
use tracing::debug;

use super::fixup::Severance;
use super::properties::WriteOrigin;
use super::{key_is_unset, Cache, TypeFilter};
use crate::config::CreateOptions;
use crate::events::PropertyValue;
use crate::instance::{Entity, InitialValues};
use crate::metadata::EntityType;

impl Cache {
    // =========================================================================
    // Creation and attachment
    // =========================================================================

    /// Creates an entity and attaches it as `Added`.
    ///
    /// # Errors
    ///
    /// See [`Cache::create_entity_with`].
    pub fn create_entity(&mut self, type_name: &str, values: InitialValues) -> Result<EntityId> {
        self.create_entity_with(type_name, values, CreateOptions::default())
    }

    /// Creates an entity with initial values.
    ///
    /// The type's constructor runs first, then data values are applied, then
    /// the type's initializer runs with the entity still detached. To-one
    /// navigations are set before attaching and collections after.
    ///
    /// With `options.merge_strategy` set, a key collision merges the new
    /// values into the attached entity and returns its handle instead.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown type or property, `TypeMismatch` for
    /// an uncoercible value, or `IntegrityViolation` for a null or duplicate key.
    pub fn create_entity_with(
        &mut self,
        type_name: &str,
        values: InitialValues,
        options: CreateOptions,
    ) -> Result<EntityId> {
        self.transaction(|cache| {
            let et = cache.metadata.get_entity_type(type_name)?;
            let mut entity = cache.metadata.create_entity(et.name())?;
            let mut navigations = Vec::new();
            for (name, value) in values.iter() {
                match value {
                    PropertyValue::Data(v) => entity.set(name, v.clone())?,
                    other => {
                        let (ordinal, _) = et.require_navigation_property(name)?;
                        navigations.push((ordinal, other.clone()));
                    }
                }
            }
            let id = cache.insert_record(entity);
            if let Some(initializer) = cache.metadata.hooks(et.name()).initializer {
                initializer(cache, id)?;
            }
            for (ordinal, value) in &navigations {
                if let PropertyValue::Reference(Some(target)) = value {
                    cache.construct_reference(id, &et, *ordinal, *target)?;
                }
            }

            let mut id = id;
            if options.state.is_attached() && cache.state_of(id)?.is_detached() {
                let key = cache.record(id)?.key_for(&et);
                let existing = options
                    .merge_strategy
                    .filter(|_| !key_is_unset(&et, &key))
                    .and_then(|s| cache.find_entity_by_key(&key).map(|e| (e, s)));
                match existing {
                    Some((existing, strategy)) => {
                        cache.merge_created(existing, id, &et, options.state, strategy)?;
                        id = existing;
                    }
                    None => cache.attach_record(id, options.state)?,
                }
            }

            for (ordinal, value) in navigations {
                if let PropertyValue::Collection(children) = value {
                    let name = et.navigation_properties()[ordinal].name.clone();
                    for child in children {
                        cache.push_related_internal(id, &name, child)?;
                    }
                }
            }
            Ok(id)
        })
    }

    /// Points a not-yet-attached entity at a parent without touching the
    /// parent's collection; attaching links the rest.
    fn construct_reference(
        &mut self,
        id: EntityId,
        et: &Arc<EntityType>,
        ordinal: usize,
        target: EntityId,
    ) -> Result<()> {
        self.record(target)?;
        self.record_mut(id)?.set_reference(et, ordinal, Some(target));
        let nav = Arc::clone(&et.navigation_properties()[ordinal]);
        self.copy_foreign_key(id, et, &nav, target)
    }

    /// Takes ownership of an entity instance and attaches it.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` when `state` is `Detached`, or
    /// `IntegrityViolation` for a null or duplicate key.
    pub fn attach_entity(&mut self, entity: Entity, state: EntityState) -> Result<EntityId> {
        self.transaction(|cache| {
            let id = cache.insert_record(entity);
            cache.attach_record(id, state)?;
            Ok(id)
        })
    }

    /// Takes ownership of an entity instance and attaches it as `Added`.
    ///
    /// # Errors
    ///
    /// See [`Cache::attach_entity`].
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId> {
        self.attach_entity(entity, EntityState::Added)
    }

    /// Attaches a detached entity the cache already holds.
    ///
    /// Attaching an attached entity does nothing.
    ///
    /// # Errors
    ///
    /// See [`Cache::attach_entity`].
    pub fn attach(&mut self, id: EntityId, state: EntityState) -> Result<()> {
        self.transaction(|cache| cache.attach_record(id, state))
    }

    pub(crate) fn attach_record(&mut self, id: EntityId, state: EntityState) -> Result<()> {
        if state.is_detached() {
            return Err(Error::state_conflict("attach as detached", state));
        }
        if self.state_of(id)?.is_attached() {
            return Ok(());
        }
        let et = self.entity_type_of(id)?;
        let mut key = self.record(id)?.key_for(&et);
        if state.is_added()
            && et.auto_generated_key_type.is_generated()
            && key_is_unset(&et, &key)
        {
            key = self.assign_temp_key(id, &et)?;
        }
        if key.has_null() {
            return Err(Error::new(ErrorKind::IntegrityViolation(format!(
                "cannot attach {} with a null key",
                et.name()
            ))));
        }
        if self.find_entity_by_key(&key).is_some() {
            return Err(Error::duplicate_key(&key));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let temp = state.is_added() && self.key_generator.is_temp_key(&key);
        let record = self.record_mut(id)?;
        record.aspect.state = state;
        record.aspect.attach_seq = seq;
        record.aspect.has_temp_key = record.aspect.has_temp_key || temp;
        if !state.is_modified() && !state.is_deleted() {
            record.aspect.original_values.clear();
        }
        self.index_insert(&et, key.clone(), id, seq);
        debug!(entity_type = et.name(), key = %key, state = %state, "attached entity");
        self.link(id)
    }

    fn assign_temp_key(&mut self, id: EntityId, et: &Arc<EntityType>) -> Result<EntityKey> {
        let (value, key) = loop {
            let value = self.key_generator.generate_temp_key_value(et)?;
            let key = et.key_from(vec![value.clone()]);
            if self.find_entity_by_key(&key).is_none() {
                break (value, key);
            }
        };
        let ordinal = et.key_ordinals()[0];
        let name = et.data_properties()[ordinal].name.clone();
        let record = self.record_mut(id)?;
        let old = record.value_at(et, ordinal);
        record.set_value_at(et, ordinal, value.clone());
        record.aspect.has_temp_key = true;
        self.queue_property(id, &name, PropertyValue::Data(old), PropertyValue::Data(value));
        Ok(key)
    }

    /// Removes an entity from the cache. Returns false if it was not attached.
    ///
    /// The record stays readable through its handle until forgotten.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn detach_entity(&mut self, id: EntityId) -> Result<bool> {
        self.transaction(|cache| cache.detach_record(id))
    }

    pub(crate) fn detach_record(&mut self, id: EntityId) -> Result<bool> {
        if self.state_of(id)?.is_detached() {
            return Ok(false);
        }
        let et = self.entity_type_of(id)?;
        let key = self.record(id)?.key_for(&et);
        let seq = self.record(id)?.aspect.attach_seq;
        self.index_remove(&et, &key, seq);
        self.sever(id, Severance::Detach)?;
        self.unattached.remove_child(id);
        let record = self.record_mut(id)?;
        record.aspect.state = EntityState::Detached;
        record.aspect.original_values.clear();
        debug!(entity_type = et.name(), key = %key, "detached entity");
        Ok(true)
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// Marks an entity for deletion.
    ///
    /// An `Added` entity is simply detached. Otherwise the entity becomes
    /// `Deleted` and leaves its relationships; children either cascade or
    /// become `Modified` while keeping their foreign keys.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` for a detached entity.
    pub fn set_deleted(&mut self, id: EntityId) -> Result<()> {
        self.transaction(|cache| cache.delete_record(id))
    }

    pub(crate) fn delete_record(&mut self, id: EntityId) -> Result<()> {
        match self.state_of(id)? {
            EntityState::Detached => Err(Error::state_conflict("delete", EntityState::Detached)),
            EntityState::Deleted => Ok(()),
            EntityState::Added => self.detach_record(id).map(|_| ()),
            EntityState::Unchanged | EntityState::Modified => {
                self.record_mut(id)?.aspect.state = EntityState::Deleted;
                debug!(entity = %id, "deleted entity");
                self.sever(id, Severance::Delete)
            }
        }
    }

    /// Marks an unchanged entity as modified.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` for a detached entity.
    pub fn set_modified(&mut self, id: EntityId) -> Result<()> {
        self.transaction(|cache| match cache.state_of(id)? {
            EntityState::Detached => Err(Error::state_conflict("modify", EntityState::Detached)),
            EntityState::Unchanged => {
                cache.record_mut(id)?.aspect.state = EntityState::Modified;
                Ok(())
            }
            _ => Ok(()),
        })
    }

    /// Accepts an entity's pending changes. Returns false if there were none.
    ///
    /// Deleted entities leave the cache; added and modified ones become
    /// `Unchanged` and forget their original values.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn accept_entity_changes(&mut self, id: EntityId) -> Result<bool> {
        self.transaction(|cache| cache.accept_record(id))
    }

    pub(crate) fn accept_record(&mut self, id: EntityId) -> Result<bool> {
        match self.state_of(id)? {
            EntityState::Detached | EntityState::Unchanged => Ok(false),
            EntityState::Deleted => self.detach_record(id),
            EntityState::Added | EntityState::Modified => {
                let et = self.entity_type_of(id)?;
                let key = self.record(id)?.key_for(&et);
                let record = self.record_mut(id)?;
                let had_temp_key = record.aspect.has_temp_key;
                record.aspect.state = EntityState::Unchanged;
                record.aspect.original_values.clear();
                record.aspect.has_temp_key = false;
                if had_temp_key {
                    self.key_generator.forget_temp_key(&key);
                }
                Ok(true)
            }
        }
    }

    /// Reverts an entity's pending changes. Returns false if there were none.
    ///
    /// Added entities leave the cache. Modified and deleted entities get
    /// their original values back, become `Unchanged`, and rejoin their
    /// relationships.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolation` if a restored key collides.
    pub fn reject_entity_changes(&mut self, id: EntityId) -> Result<bool> {
        self.transaction(|cache| cache.reject_record(id))
    }

    pub(crate) fn reject_record(&mut self, id: EntityId) -> Result<bool> {
        match self.state_of(id)? {
            EntityState::Detached | EntityState::Unchanged => Ok(false),
            EntityState::Added => self.detach_record(id),
            EntityState::Modified | EntityState::Deleted => {
                let et = self.entity_type_of(id)?;
                let record = self.record_mut(id)?;
                let originals = std::mem::take(&mut record.aspect.original_values);
                record.aspect.state = EntityState::Unchanged;
                for (name, value) in originals {
                    let Some(ordinal) = et.data_ordinal(&name) else {
                        continue;
                    };
                    self.write_data(id, &et, ordinal, value, &name, WriteOrigin::Merge)?;
                }
                self.link(id)?;
                debug!(entity = %id, "rejected changes");
                Ok(true)
            }
        }
    }

    /// Accepts pending changes of every attached entity.
    ///
    /// Returns the entities that changed state.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache is internally inconsistent.
    pub fn accept_changes(&mut self) -> Result<Vec<EntityId>> {
        self.transaction(|cache| {
            let changed = cache.get_changes(TypeFilter::All)?;
            for id in &changed {
                cache.accept_record(*id)?;
            }
            Ok(changed)
        })
    }

    /// Rejects pending changes of every attached entity.
    ///
    /// Returns the entities that changed state.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolation` if a restored key collides.
    pub fn reject_changes(&mut self) -> Result<Vec<EntityId>> {
        self.transaction(|cache| {
            let changed = cache.get_changes(TypeFilter::All)?;
            for id in &changed {
                cache.reject_record(*id)?;
            }
            Ok(changed)
        })
    }

    /// Moves an entity to a merged state, cutting or restoring its
    /// relationships as the state crosses `Deleted`.
    pub(crate) fn set_state_for_merge(&mut self, id: EntityId, state: EntityState) -> Result<()> {
        let old = self.state_of(id)?;
        if old == state {
            return Ok(());
        }
        self.record_mut(id)?.aspect.state = state;
        if state.is_deleted() {
            self.sever(id, Severance::Merge)?;
        } else if old.is_deleted() {
            self.link(id)?;
        }
        if state.is_unchanged() || state.is_added() {
            self.record_mut(id)?.aspect.original_values.clear();
        }
        Ok(())
    }
}
