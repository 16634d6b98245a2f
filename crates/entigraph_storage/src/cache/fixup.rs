//! Relationship fixup.
//!
//! Keeps navigation slots, inverse collections, and foreign-key values in
//! agreement as references are set, entities attach and detach, and keys
//! change. Children whose parent is not in the cache yet wait in
//! [`UnattachedChildren`] under the parent key they point at.

use std::sync::Arc;

use entigraph_foundation::{EntityId, EntityKey, EntityState, Error, ErrorKind, Result, Value};
use tracing::trace;

use super::Cache;
use super::properties::WriteOrigin;
use crate::config::MergeStrategy;
use crate::events::PropertyValue;
use crate::metadata::{EntityType, NavigationProperty, OnDelete};

/// Children waiting for a parent key to be attached.
///
/// Bidirectional: by parent key for adoption, and by child for pruning.
#[derive(Clone, Debug, Default)]
pub(crate) struct UnattachedChildren {
    /// parent key -> (child, child's navigation ordinal)
    by_parent: im::HashMap<EntityKey, Vec<(EntityId, usize)>>,
    /// child -> parent keys it waits on
    by_child: im::HashMap<EntityId, im::HashSet<EntityKey>>,
}

impl UnattachedChildren {
    pub(crate) fn add(&mut self, parent: EntityKey, child: EntityId, ordinal: usize) {
        let entries = self.by_parent.entry(parent.clone()).or_default();
        if !entries.contains(&(child, ordinal)) {
            entries.push((child, ordinal));
        }
        self.by_child.entry(child).or_default().insert(parent);
    }

    /// Removes and returns every child waiting on a parent key.
    pub(crate) fn take(&mut self, parent: &EntityKey) -> Vec<(EntityId, usize)> {
        let entries = self.by_parent.remove(parent).unwrap_or_default();
        for (child, _) in &entries {
            self.unlink_child(*child, parent);
        }
        entries
    }

    /// Drops one navigation of a child from every pending entry.
    pub(crate) fn remove_navigation(&mut self, child: EntityId, ordinal: usize) {
        let Some(parents) = self.by_child.get(&child).cloned() else {
            return;
        };
        for parent in parents {
            let now_empty = match self.by_parent.get_mut(&parent) {
                Some(entries) => {
                    entries.retain(|e| *e != (child, ordinal));
                    entries.is_empty()
                }
                None => true,
            };
            let still_waiting = self
                .by_parent
                .get(&parent)
                .is_some_and(|entries| entries.iter().any(|(c, _)| *c == child));
            if now_empty {
                self.by_parent.remove(&parent);
            }
            if !still_waiting {
                self.unlink_child(child, &parent);
            }
        }
    }

    /// Drops a child from every pending entry.
    pub(crate) fn remove_child(&mut self, child: EntityId) {
        let Some(parents) = self.by_child.remove(&child) else {
            return;
        };
        for parent in parents {
            if let Some(entries) = self.by_parent.get_mut(&parent) {
                entries.retain(|(c, _)| *c != child);
                if entries.is_empty() {
                    self.by_parent.remove(&parent);
                }
            }
        }
    }

    fn unlink_child(&mut self, child: EntityId, parent: &EntityKey) {
        if let Some(keys) = self.by_child.get_mut(&child) {
            keys.remove(parent);
            if keys.is_empty() {
                self.by_child.remove(&child);
            }
        }
    }

    /// Number of parent keys with waiting children.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_parent.len()
    }
}

/// Why an entity's relationships are being cut.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Severance {
    /// The entity is leaving the cache.
    Detach,
    /// The entity was marked deleted.
    Delete,
    /// A merge marked the entity deleted.
    Merge,
}

impl Cache {
    /// Sets a scalar navigation and keeps the inverse side and foreign keys in step.
    pub(crate) fn set_reference(
        &mut self,
        child: EntityId,
        et: &Arc<EntityType>,
        ordinal: usize,
        target: Option<EntityId>,
        origin: WriteOrigin,
    ) -> Result<()> {
        let nav = Arc::clone(&et.navigation_properties()[ordinal]);
        if self.record(child)?.reference(ordinal) == target {
            return Ok(());
        }
        if let Some(parent) = target {
            self.check_target_type(&nav, parent)?;
            let child_state = self.state_of(child)?;
            let parent_state = self.state_of(parent)?;
            if child_state.is_attached() && parent_state.is_detached() {
                self.attach_record(parent, EntityState::Added)?;
            } else if child_state.is_detached() && parent_state.is_attached() {
                self.attach_record(child, EntityState::Added)?;
            }
        }

        let old = self.record(child)?.reference(ordinal);
        if old == target {
            return Ok(());
        }
        let child_state = self.state_of(child)?;
        self.record_mut(child)?.set_reference(et, ordinal, target);
        self.queue_property(
            child,
            &nav.name,
            PropertyValue::Reference(old),
            PropertyValue::Reference(target),
        );
        if origin == WriteOrigin::User && child_state.is_unchanged() {
            self.record_mut(child)?.aspect.state = EntityState::Modified;
        }
        self.unattached.remove_navigation(child, ordinal);

        let inverse = self.metadata.inverse_of(&nav);
        if let Some(old_parent) = old {
            self.remove_from_inverse(old_parent, inverse.as_deref(), child)?;
        }
        match target {
            Some(parent) => {
                self.copy_foreign_key(child, et, &nav, parent)?;
                if !self.state_of(child)?.is_deleted() {
                    self.add_to_inverse(parent, inverse.as_deref(), child)?;
                }
            }
            None if matches!(child_state, EntityState::Added | EntityState::Detached) => {
                for fk in et.foreign_key_ordinals(&nav)? {
                    let name = et.data_properties()[fk].name.clone();
                    self.write_data(child, et, fk, Value::Null, &name, WriteOrigin::Fixup)?;
                }
            }
            None => {}
        }
        trace!(child = %child, navigation = nav.name.as_str(), "set reference");
        Ok(())
    }

    fn check_target_type(&self, nav: &NavigationProperty, target: EntityId) -> Result<()> {
        let expected = self.metadata.get_entity_type(&nav.entity_type_name)?;
        let actual = self.record(target)?.type_name();
        if actual == expected.name() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::IntegrityViolation(format!(
                "navigation '{}' expects {} but was given {actual}",
                nav.name,
                expected.name()
            ))))
        }
    }

    /// Copies the parent's key into the child's foreign-key properties.
    pub(crate) fn copy_foreign_key(
        &mut self,
        child: EntityId,
        child_et: &Arc<EntityType>,
        nav: &NavigationProperty,
        parent: EntityId,
    ) -> Result<()> {
        let fks = child_et.foreign_key_ordinals(nav)?;
        if fks.is_empty() {
            return Ok(());
        }
        let parent_et = self.entity_type_of(parent)?;
        let parent_key = self.record(parent)?.key_for(&parent_et);
        for (fk, value) in fks.into_iter().zip(parent_key.values()) {
            let name = child_et.data_properties()[fk].name.clone();
            self.write_data(child, child_et, fk, value.clone(), &name, WriteOrigin::Fixup)?;
        }
        Ok(())
    }

    /// The parent key a child's foreign key points at, if fully set.
    pub(crate) fn foreign_key_of(
        &self,
        child: EntityId,
        child_et: &EntityType,
        nav: &NavigationProperty,
    ) -> Result<Option<EntityKey>> {
        let fks = child_et.foreign_key_ordinals(nav)?;
        if fks.is_empty() {
            return Ok(None);
        }
        let record = self.record(child)?;
        let values: Vec<Value> = fks.iter().map(|&i| record.value_at(child_et, i)).collect();
        if values.iter().any(Value::is_null) {
            return Ok(None);
        }
        let parent_et = self.metadata.get_entity_type(&nav.entity_type_name)?;
        Ok(Some(parent_et.key_from(values)))
    }

    fn live_parent(&self, key: &EntityKey) -> Option<EntityId> {
        self.find_entity_by_key(key).filter(|id| {
            self.records
                .get(id)
                .is_some_and(|r| !r.aspect.state.is_deleted())
        })
    }

    pub(crate) fn add_to_inverse(
        &mut self,
        parent: EntityId,
        inverse: Option<&NavigationProperty>,
        child: EntityId,
    ) -> Result<()> {
        let Some(inverse) = inverse else {
            return Ok(());
        };
        let parent_et = self.entity_type_of(parent)?;
        let Some(ordinal) = parent_et.navigation_ordinal(&inverse.name) else {
            return Ok(());
        };
        if inverse.is_scalar {
            let old = self.record(parent)?.reference(ordinal);
            if old != Some(child) {
                self.record_mut(parent)?
                    .set_reference(&parent_et, ordinal, Some(child));
                self.queue_property(
                    parent,
                    &inverse.name,
                    PropertyValue::Reference(old),
                    PropertyValue::Reference(Some(child)),
                );
            }
            return Ok(());
        }
        let Some(array) = self.record_mut(parent)?.relation_array_mut(&parent_et, ordinal) else {
            return Ok(());
        };
        if array.contains(child) {
            return Ok(());
        }
        array.items.push(child);
        self.queue_array(parent, ordinal, &inverse.name, &[child], &[]);
        Ok(())
    }

    pub(crate) fn remove_from_inverse(
        &mut self,
        parent: EntityId,
        inverse: Option<&NavigationProperty>,
        child: EntityId,
    ) -> Result<()> {
        let Some(inverse) = inverse else {
            return Ok(());
        };
        if !self.arena.exists(parent) {
            return Ok(());
        }
        let parent_et = self.entity_type_of(parent)?;
        let Some(ordinal) = parent_et.navigation_ordinal(&inverse.name) else {
            return Ok(());
        };
        if inverse.is_scalar {
            if self.record(parent)?.reference(ordinal) == Some(child) {
                self.record_mut(parent)?.set_reference(&parent_et, ordinal, None);
                self.queue_property(
                    parent,
                    &inverse.name,
                    PropertyValue::Reference(Some(child)),
                    PropertyValue::Reference(None),
                );
            }
            return Ok(());
        }
        let Some(array) = self.record_mut(parent)?.relation_array_mut(&parent_et, ordinal) else {
            return Ok(());
        };
        let Some(pos) = array.items.iter().position(|i| *i == child) else {
            return Ok(());
        };
        array.items.remove(pos);
        self.queue_array(parent, ordinal, &inverse.name, &[], &[child]);
        Ok(())
    }

    /// Points a child's navigation at the attached parent its foreign key
    /// names, or queues it until that parent arrives.
    fn resolve_from_foreign_key(
        &mut self,
        child: EntityId,
        et: &Arc<EntityType>,
        ordinal: usize,
    ) -> Result<()> {
        let nav = Arc::clone(&et.navigation_properties()[ordinal]);
        let Some(key) = self.foreign_key_of(child, et, &nav)? else {
            return Ok(());
        };
        match self.live_parent(&key) {
            Some(parent) => {
                self.record_mut(child)?.set_reference(et, ordinal, Some(parent));
                self.queue_property(
                    child,
                    &nav.name,
                    PropertyValue::Reference(None),
                    PropertyValue::Reference(Some(parent)),
                );
                let inverse = self.metadata.inverse_of(&nav);
                self.add_to_inverse(parent, inverse.as_deref(), child)
            }
            None => {
                trace!(child = %child, parent = %key, "parent not attached, deferring");
                self.unattached.add(key, child, ordinal);
                Ok(())
            }
        }
    }

    /// Re-points a navigation after its foreign key was written directly.
    pub(crate) fn sync_reference_from_foreign_key(
        &mut self,
        child: EntityId,
        et: &Arc<EntityType>,
        ordinal: usize,
    ) -> Result<()> {
        let state = self.state_of(child)?;
        if !state.is_attached() || state.is_deleted() {
            return Ok(());
        }
        let nav = Arc::clone(&et.navigation_properties()[ordinal]);
        let key = self.foreign_key_of(child, et, &nav)?;
        let new_parent = key.as_ref().and_then(|k| self.live_parent(k));
        let old = self.record(child)?.reference(ordinal);
        if old.is_some() && old == new_parent {
            return Ok(());
        }
        self.unattached.remove_navigation(child, ordinal);
        let inverse = self.metadata.inverse_of(&nav);
        if let Some(old_parent) = old {
            self.remove_from_inverse(old_parent, inverse.as_deref(), child)?;
        }
        if old != new_parent {
            self.record_mut(child)?.set_reference(et, ordinal, new_parent);
            self.queue_property(
                child,
                &nav.name,
                PropertyValue::Reference(old),
                PropertyValue::Reference(new_parent),
            );
        }
        match (new_parent, key) {
            (Some(parent), _) => self.add_to_inverse(parent, inverse.as_deref(), child)?,
            (None, Some(key)) => self.unattached.add(key, child, ordinal),
            (None, None) => {}
        }
        Ok(())
    }

    /// Connects a newly attached (or restored) entity to the rest of the cache.
    pub(crate) fn link(&mut self, id: EntityId) -> Result<()> {
        if self.state_of(id)?.is_deleted() {
            return Ok(());
        }
        let et = self.entity_type_of(id)?;
        for (ordinal, nav) in et.navigation_properties().iter().enumerate() {
            let inverse = self.metadata.inverse_of(nav);
            if nav.is_scalar {
                match self.record(id)?.reference(ordinal) {
                    Some(parent) if self.arena.exists(parent) => {
                        if self.state_of(parent)?.is_detached() {
                            self.attach_record(parent, EntityState::Added)?;
                        }
                        self.copy_foreign_key(id, &et, nav, parent)?;
                        self.add_to_inverse(parent, inverse.as_deref(), id)?;
                    }
                    _ => self.resolve_from_foreign_key(id, &et, ordinal)?,
                }
            } else {
                let Some(inverse) = inverse else { continue };
                let children = self.record(id)?.collection(ordinal).to_vec();
                for child in children {
                    if !self.arena.exists(child) {
                        continue;
                    }
                    if self.state_of(child)?.is_detached() {
                        self.attach_record(child, EntityState::Added)?;
                    }
                    let child_et = self.entity_type_of(child)?;
                    self.copy_foreign_key(child, &child_et, &inverse, id)?;
                }
            }
        }
        let key = self.record(id)?.key_for(&et);
        self.adopt_waiting_children(id, &key)
    }

    /// Connects children that were waiting for `key` to the entity `parent`.
    pub(crate) fn adopt_waiting_children(
        &mut self,
        parent: EntityId,
        key: &EntityKey,
    ) -> Result<()> {
        for (child, ordinal) in self.unattached.take(key) {
            if !self.arena.exists(child) {
                continue;
            }
            let state = self.state_of(child)?;
            if !state.is_attached() || state.is_deleted() {
                continue;
            }
            let child_et = self.entity_type_of(child)?;
            if self.record(child)?.reference(ordinal).is_some() {
                continue;
            }
            let nav = Arc::clone(&child_et.navigation_properties()[ordinal]);
            if self.foreign_key_of(child, &child_et, &nav)?.as_ref() != Some(key) {
                continue;
            }
            self.record_mut(child)?
                .set_reference(&child_et, ordinal, Some(parent));
            self.queue_property(
                child,
                &nav.name,
                PropertyValue::Reference(None),
                PropertyValue::Reference(Some(parent)),
            );
            let inverse = self.metadata.inverse_of(&nav);
            self.add_to_inverse(parent, inverse.as_deref(), child)?;
            trace!(child = %child, parent = %parent, "adopted waiting child");
        }
        Ok(())
    }

    /// Cuts an entity out of its relationships.
    ///
    /// Foreign keys are kept, so the cut can be undone by linking again.
    pub(crate) fn sever(&mut self, id: EntityId, mode: Severance) -> Result<()> {
        let et = self.entity_type_of(id)?;
        let key = self.record(id)?.key_for(&et);
        for (ordinal, nav) in et.navigation_properties().iter().enumerate() {
            let inverse = self.metadata.inverse_of(nav);
            if nav.is_scalar {
                if let Some(parent) = self.record(id)?.reference(ordinal) {
                    self.record_mut(id)?.set_reference(&et, ordinal, None);
                    self.queue_property(
                        id,
                        &nav.name,
                        PropertyValue::Reference(Some(parent)),
                        PropertyValue::Reference(None),
                    );
                    self.remove_from_inverse(parent, inverse.as_deref(), id)?;
                }
                self.unattached.remove_navigation(id, ordinal);
                continue;
            }
            let children = self.record(id)?.collection(ordinal).to_vec();
            if children.is_empty() {
                continue;
            }
            if let Some(array) = self.record_mut(id)?.relation_array_mut(&et, ordinal) {
                array.items.clear();
            }
            self.queue_array(id, ordinal, &nav.name, &[], &children);
            let Some(inverse) = inverse else { continue };
            for child in children {
                if !self.arena.exists(child) {
                    continue;
                }
                let child_et = self.entity_type_of(child)?;
                let Some(child_ordinal) = child_et.navigation_ordinal(&inverse.name) else {
                    continue;
                };
                if self.record(child)?.reference(child_ordinal) == Some(id) {
                    self.record_mut(child)?
                        .set_reference(&child_et, child_ordinal, None);
                    self.queue_property(
                        child,
                        &inverse.name,
                        PropertyValue::Reference(Some(id)),
                        PropertyValue::Reference(None),
                    );
                }
                let child_state = self.state_of(child)?;
                let live = child_state.is_attached() && !child_state.is_deleted();
                if mode == Severance::Delete && live {
                    if nav.on_delete == OnDelete::Cascade {
                        self.delete_record(child)?;
                        continue;
                    }
                    if child_state.is_unchanged() {
                        self.record_mut(child)?.aspect.state = EntityState::Modified;
                    }
                }
                if live {
                    self.unattached.add(key.clone(), child, child_ordinal);
                }
            }
        }
        trace!(entity = %id, mode = ?mode, "severed relationships");
        Ok(())
    }

    /// Moves an attached entity to a new key.
    pub(crate) fn rekey(
        &mut self,
        id: EntityId,
        et: &Arc<EntityType>,
        old_key: &EntityKey,
        new_key: EntityKey,
    ) -> Result<()> {
        if *old_key == new_key {
            return Ok(());
        }
        if let Some(other) = self.find_entity_by_key(&new_key) {
            if other != id {
                return Err(Error::duplicate_key(&new_key));
            }
        }
        if let Some(group) = self.groups.get_mut(et.name()) {
            group.by_key.remove(old_key);
            group.by_key.insert(new_key.clone(), id);
        }
        for (ordinal, nav) in et.navigation_properties().iter().enumerate() {
            if nav.is_scalar {
                continue;
            }
            let Some(inverse) = self.metadata.inverse_of(nav) else {
                continue;
            };
            for child in self.record(id)?.collection(ordinal).to_vec() {
                let child_et = self.entity_type_of(child)?;
                self.copy_foreign_key(child, &child_et, &inverse, id)?;
            }
        }
        trace!(entity = %id, from = %old_key, to = %new_key, "rekeyed entity");
        self.adopt_waiting_children(id, &new_key)
    }

    /// Merges a just-created record into the attached entity sharing its key.
    pub(crate) fn merge_created(
        &mut self,
        existing: EntityId,
        created: EntityId,
        et: &Arc<EntityType>,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let overwrite = match strategy {
            MergeStrategy::Disallowed => {
                return Err(Error::duplicate_key(self.record(existing)?.key_for(et)));
            }
            MergeStrategy::SkipMerge => false,
            MergeStrategy::PreserveChanges => !self.state_of(existing)?.is_changed(),
            MergeStrategy::OverwriteChanges => true,
        };
        if overwrite {
            for (ordinal, property) in et.data_properties().iter().enumerate() {
                let value = self.record(created)?.value_at(et, ordinal);
                self.write_data(existing, et, ordinal, value, &property.name, WriteOrigin::Merge)?;
            }
            self.set_state_for_merge(existing, state)?;
        }
        self.forget_record(created)
    }
}
