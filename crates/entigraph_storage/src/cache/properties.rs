//! Property access through the cache.
//!
//! All writes to attached entities go through [`Cache::write_data`], which
//! tracks original values, maintains the key index, and re-resolves
//! navigations when a foreign key changes.

use std::sync::Arc;

use entigraph_foundation::{ComplexValue, EntityId, EntityState, Error, Result, Value};

use super::{check_complex, split_path, Cache};
use crate::events::PropertyValue;
use crate::metadata::{DataProperty, EntityType};

/// Where a data write comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    /// Application code.
    User,
    /// Relationship maintenance.
    Fixup,
    /// Merge, reject, or save results; never tracked.
    Merge,
}

impl Cache {
    /// Writes a coerced value to a data property. Returns false if unchanged.
    pub(crate) fn write_data(
        &mut self,
        id: EntityId,
        et: &Arc<EntityType>,
        ordinal: usize,
        value: Value,
        label: &str,
        origin: WriteOrigin,
    ) -> Result<bool> {
        let property = Arc::clone(&et.data_properties()[ordinal]);
        let record = self.record(id)?;
        let old = record.value_at(et, ordinal);
        if old == value {
            return Ok(false);
        }
        let state = record.aspect.state;
        let old_key = (property.is_part_of_key && state.is_attached()).then(|| record.key_for(et));
        let tracked = origin != WriteOrigin::Merge
            && !property.is_unmapped
            && matches!(
                state,
                EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
            );

        let record = self.record_mut(id)?;
        record.set_value_at(et, ordinal, value.clone());
        if tracked {
            record
                .aspect
                .original_values
                .entry(property.name.clone())
                .or_insert_with(|| old.clone());
            if state.is_unchanged() {
                record.aspect.state = EntityState::Modified;
            }
        }
        self.queue_property(id, label, PropertyValue::Data(old), PropertyValue::Data(value));

        if let Some(old_key) = old_key {
            let new_key = self.record(id)?.key_for(et);
            if origin == WriteOrigin::User {
                let temp = self.key_generator.is_temp_key(&new_key);
                self.record_mut(id)?.aspect.has_temp_key = temp;
            }
            self.rekey(id, et, &old_key, new_key)?;
        }
        if origin != WriteOrigin::Fixup {
            for (nav_ordinal, nav) in et.navigation_properties().iter().enumerate() {
                if nav.is_scalar && nav.foreign_key_names.contains(&property.name) {
                    self.sync_reference_from_foreign_key(id, et, nav_ordinal)?;
                }
            }
        }
        Ok(true)
    }

    /// Writes a data property, a complex field (`"location.city"`), or a
    /// property of a related entity (`"customer.companyName"`).
    pub(crate) fn set_value_internal(
        &mut self,
        id: EntityId,
        path: &str,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<bool> {
        let et = self.entity_type_of(id)?;
        let (head, rest) = split_path(path);
        if let (Some(ordinal), Some(rest)) = (et.navigation_ordinal(head), rest) {
            return match self.record(id)?.reference(ordinal) {
                Some(related) => self.set_value_internal(related, rest, value, origin),
                None => Err(Error::property_not_found(et.name(), path)),
            };
        }
        let (ordinal, property) = et.require_data_property(head)?;
        let property = Arc::clone(property);
        let value = match rest {
            None if property.is_complex() => check_complex(&property, value)?,
            None => property.coerce(value)?,
            Some(rest) => {
                let current = self.record(id)?.value_at(&et, ordinal);
                Value::Complex(self.with_complex_field(&property, current, rest, value)?)
            }
        };
        self.write_data(id, &et, ordinal, value, path, origin)
    }

    fn with_complex_field(
        &self,
        property: &DataProperty,
        current: Value,
        path: &str,
        value: Value,
    ) -> Result<ComplexValue> {
        let type_name = property
            .complex_type_name
            .as_deref()
            .ok_or_else(|| Error::property_not_found(&property.name, path))?;
        let ct = self.metadata.get_complex_type(type_name)?;
        let mut complex = match current {
            Value::Complex(c) => c,
            _ => match self.metadata.initial_value(property) {
                Value::Complex(c) => c,
                _ => ComplexValue::new(ct.name()),
            },
        };
        let (head, rest) = split_path(path);
        let field = ct
            .data_property(head)
            .ok_or_else(|| Error::property_not_found(ct.name(), head))?;
        let new_value = match rest {
            None if field.is_complex() => check_complex(field, value)?,
            None => field.coerce(value)?,
            Some(rest) => {
                let inner = complex.get(head).cloned().unwrap_or_default();
                Value::Complex(self.with_complex_field(field, inner, rest, value)?)
            }
        };
        complex.set(head, new_value);
        Ok(complex)
    }

    /// Reads a data value, complex field, navigation, or a property of a
    /// related entity by dotted path.
    ///
    /// A path through an empty to-one navigation reads as null.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first segment that does not resolve.
    pub fn get_property_value(&self, id: EntityId, path: &str) -> Result<PropertyValue> {
        let et = self.entity_type_of(id)?;
        let record = self.record(id)?;
        let (head, rest) = split_path(path);
        if let Some(ordinal) = et.data_ordinal(head) {
            let mut value = record.value_at(&et, ordinal);
            if let Some(rest) = rest {
                for segment in rest.split('.') {
                    value = match &value {
                        Value::Complex(c) => c
                            .get(segment)
                            .cloned()
                            .ok_or_else(|| Error::property_not_found(c.type_name(), segment))?,
                        _ => return Err(Error::property_not_found(et.name(), path)),
                    };
                }
            }
            return Ok(PropertyValue::Data(value));
        }
        let (ordinal, nav) = et.require_navigation_property(head)?;
        match (rest, record.nav(ordinal)) {
            (None, Some(slot)) => Ok(slot.to_property_value()),
            (None, None) if nav.is_scalar => Ok(PropertyValue::Reference(None)),
            (None, None) => Ok(PropertyValue::Collection(Vec::new())),
            (Some(rest), _) if nav.is_scalar => match record.reference(ordinal) {
                Some(related) => self.get_property_value(related, rest),
                None => Ok(PropertyValue::Data(Value::Null)),
            },
            (Some(_), _) => Err(Error::property_not_found(et.name(), path)),
        }
    }

    /// Reads a data value by dotted path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path does not end at a data property.
    pub fn get_value(&self, id: EntityId, path: &str) -> Result<Value> {
        match self.get_property_value(id, path)? {
            PropertyValue::Data(value) => Ok(value),
            _ => Err(Error::property_not_found(self.record(id)?.type_name(), path)),
        }
    }

    /// Writes a data value by dotted path.
    ///
    /// Writing a key property of an attached entity moves it in the key
    /// index and updates dependents' foreign keys. Writing a foreign key
    /// re-points the matching navigation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown property, `TypeMismatch` for a value
    /// that cannot be coerced, or `IntegrityViolation` if a key change
    /// collides with another attached entity.
    pub fn set_value(&mut self, id: EntityId, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.transaction(|cache| {
            cache
                .set_value_internal(id, path, value, WriteOrigin::User)
                .map(|_| ())
        })
    }

    /// Writes any property by dotted path: data values, to-one references,
    /// or the full membership of a collection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path does not resolve or the value kind does
    /// not fit the property, plus the errors of [`Cache::set_value`] and
    /// [`Cache::set_related`].
    pub fn set_property_value(
        &mut self,
        id: EntityId,
        path: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let value = value.into();
        self.transaction(|cache| {
            let (owner, name) = cache.resolve_owner(id, path)?;
            match value {
                PropertyValue::Data(v) => cache
                    .set_value_internal(owner, name, v, WriteOrigin::User)
                    .map(|_| ()),
                PropertyValue::Reference(target) => cache.set_related(owner, name, target),
                PropertyValue::Collection(members) => {
                    for current in cache.get_collection(owner, name)? {
                        if !members.contains(&current) {
                            cache.remove_related(owner, name, current)?;
                        }
                    }
                    for member in members {
                        cache.push_related_internal(owner, name, member)?;
                    }
                    Ok(())
                }
            }
        })
    }

    /// Follows to-one navigations to the entity owning the last navigation
    /// segment of a path. Complex paths stay with their entity.
    fn resolve_owner<'p>(&self, id: EntityId, path: &'p str) -> Result<(EntityId, &'p str)> {
        let (head, rest) = split_path(path);
        let Some(rest) = rest else {
            return Ok((id, path));
        };
        let et = self.entity_type_of(id)?;
        match et.navigation_ordinal(head) {
            Some(ordinal) => match self.record(id)?.reference(ordinal) {
                Some(related) => self.resolve_owner(related, rest),
                None => Err(Error::property_not_found(et.name(), path)),
            },
            None => Ok((id, path)),
        }
    }

    fn scalar_ordinal(et: &EntityType, navigation: &str) -> Result<usize> {
        match et.require_navigation_property(navigation)? {
            (ordinal, nav) if nav.is_scalar => Ok(ordinal),
            _ => Err(Error::property_not_found(et.name(), navigation)),
        }
    }

    /// Reads a to-one navigation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the navigation does not exist or is a collection.
    pub fn get_related(&self, id: EntityId, navigation: &str) -> Result<Option<EntityId>> {
        let et = self.entity_type_of(id)?;
        let ordinal = Self::scalar_ordinal(&et, navigation)?;
        Ok(self.record(id)?.reference(ordinal))
    }

    /// Sets or clears a to-one navigation.
    ///
    /// Setting a reference between an attached and a detached entity
    /// attaches the detached one as `Added`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown navigation, or `IntegrityViolation`
    /// if the target has the wrong type or its attachment collides.
    pub fn set_related(
        &mut self,
        id: EntityId,
        navigation: &str,
        target: Option<EntityId>,
    ) -> Result<()> {
        self.transaction(|cache| {
            let et = cache.entity_type_of(id)?;
            let ordinal = Self::scalar_ordinal(&et, navigation)?;
            cache.set_reference(id, &et, ordinal, target, WriteOrigin::User)
        })
    }

    /// Members of a to-many navigation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the navigation does not exist or is scalar.
    pub fn get_collection(&self, id: EntityId, navigation: &str) -> Result<Vec<EntityId>> {
        let et = self.entity_type_of(id)?;
        let ordinal = Self::collection_ordinal(&et, navigation)?;
        Ok(self.record(id)?.collection(ordinal).to_vec())
    }

    /// Adds a child to a to-many navigation by pointing the child at the parent.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown navigation, or `InvalidMetadata` if
    /// the collection has no inverse navigation.
    pub fn push_related(
        &mut self,
        parent: EntityId,
        navigation: &str,
        child: EntityId,
    ) -> Result<()> {
        self.transaction(|cache| cache.push_related_internal(parent, navigation, child))
    }

    pub(crate) fn push_related_internal(
        &mut self,
        parent: EntityId,
        navigation: &str,
        child: EntityId,
    ) -> Result<()> {
        let (child_et, inverse_ordinal) = self.inverse_slot(parent, navigation, child)?;
        if self.get_collection(parent, navigation)?.contains(&child) {
            return Ok(());
        }
        self.set_reference(child, &child_et, inverse_ordinal, Some(parent), WriteOrigin::User)
    }

    /// Removes a child from a to-many navigation by clearing the child's
    /// reference. Returns false if the child was not a member.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown navigation, or `InvalidMetadata` if
    /// the collection has no inverse navigation.
    pub fn remove_related(
        &mut self,
        parent: EntityId,
        navigation: &str,
        child: EntityId,
    ) -> Result<bool> {
        self.transaction(|cache| {
            let (child_et, inverse_ordinal) = cache.inverse_slot(parent, navigation, child)?;
            if !cache.get_collection(parent, navigation)?.contains(&child) {
                return Ok(false);
            }
            cache.set_reference(child, &child_et, inverse_ordinal, None, WriteOrigin::User)?;
            Ok(true)
        })
    }

    fn inverse_slot(
        &self,
        parent: EntityId,
        navigation: &str,
        child: EntityId,
    ) -> Result<(Arc<EntityType>, usize)> {
        let parent_et = self.entity_type_of(parent)?;
        let ordinal = Self::collection_ordinal(&parent_et, navigation)?;
        let nav = &parent_et.navigation_properties()[ordinal];
        let inverse = self.metadata.inverse_of(nav).ok_or_else(|| {
            Error::invalid_metadata(format!(
                "collection '{}.{navigation}' has no inverse navigation",
                parent_et.name()
            ))
        })?;
        let child_et = self.entity_type_of(child)?;
        let inverse_ordinal = child_et
            .navigation_ordinal(&inverse.name)
            .ok_or_else(|| Error::property_not_found(child_et.name(), &inverse.name))?;
        Ok((child_et, inverse_ordinal))
    }
}
