//! Entity instances and their change-tracking aspect.
//!
//! An [`Entity`] owns its property values. Navigation slots hold
//! [`EntityId`] handles into the cache that owns the related entities, so
//! relationships only mean something inside a cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use entigraph_foundation::{EntityId, EntityKey, EntityState, Error, Result, Value};

use crate::events::{
    ArrayChangedEvent, EventChannel, PropertyChangedEvent, PropertyValue, SubscriptionToken,
};
use crate::metadata::{EntityType, MetadataStore, NavigationProperty};

/// Tracking state carried by every entity.
#[derive(Clone, Debug)]
pub struct EntityAspect {
    pub(crate) state: EntityState,
    pub(crate) was_loaded: bool,
    pub(crate) has_temp_key: bool,
    pub(crate) original_values: BTreeMap<String, Value>,
    pub(crate) property_changed: EventChannel<PropertyChangedEvent>,
    pub(crate) attach_seq: u64,
}

impl EntityAspect {
    fn new() -> Self {
        Self {
            state: EntityState::Detached,
            was_loaded: false,
            has_temp_key: false,
            original_values: BTreeMap::new(),
            property_changed: EventChannel::new(),
            attach_seq: 0,
        }
    }

    fn share(&self) -> Self {
        Self {
            state: self.state,
            was_loaded: self.was_loaded,
            has_temp_key: self.has_temp_key,
            original_values: self.original_values.clone(),
            property_changed: self.property_changed.share(),
            attach_seq: self.attach_seq,
        }
    }

    /// Current tracking state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// True if the entity came from a query result.
    #[must_use]
    pub fn was_loaded(&self) -> bool {
        self.was_loaded
    }

    /// True while the entity's key is a generated temporary key.
    #[must_use]
    pub fn has_temp_key(&self) -> bool {
        self.has_temp_key
    }

    /// Values of changed tracked properties before their first change.
    #[must_use]
    pub fn original_values(&self) -> &BTreeMap<String, Value> {
        &self.original_values
    }
}

/// Members of a to-many navigation, with their own change channel.
#[derive(Clone, Debug, Default)]
pub struct RelationArray {
    pub(crate) items: Vec<EntityId>,
    pub(crate) array_changed: EventChannel<ArrayChangedEvent>,
}

impl RelationArray {
    fn share(&self) -> Self {
        Self {
            items: self.items.clone(),
            array_changed: self.array_changed.share(),
        }
    }

    /// Members in insertion order.
    #[must_use]
    pub fn items(&self) -> &[EntityId] {
        &self.items
    }

    /// Returns true if the entity is a member.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.items.contains(&id)
    }
}

/// Storage for one navigation property.
#[derive(Clone, Debug)]
pub(crate) enum NavSlot {
    Reference(Option<EntityId>),
    Collection(RelationArray),
}

impl NavSlot {
    fn share(&self) -> Self {
        match self {
            Self::Reference(r) => Self::Reference(*r),
            Self::Collection(c) => Self::Collection(c.share()),
        }
    }

    fn empty_for(navigation: &NavigationProperty) -> Self {
        if navigation.is_scalar {
            Self::Reference(None)
        } else {
            Self::Collection(RelationArray::default())
        }
    }

    pub(crate) fn to_property_value(&self) -> PropertyValue {
        match self {
            Self::Reference(r) => PropertyValue::Reference(*r),
            Self::Collection(c) => PropertyValue::Collection(c.items.clone()),
        }
    }
}

/// An entity instance: data values, navigation slots, and its aspect.
///
/// A clone copies values, state and navigation handles but starts with no
/// subscribers.
#[derive(Clone, Debug)]
pub struct Entity {
    metadata: MetadataStore,
    entity_type: Arc<str>,
    values: Vec<Value>,
    navigation: Vec<NavSlot>,
    pub(crate) aspect: EntityAspect,
}

impl Entity {
    pub(crate) fn new(
        metadata: MetadataStore,
        entity_type: &EntityType,
        values: Vec<Value>,
    ) -> Self {
        let navigation = entity_type
            .navigation_properties()
            .iter()
            .map(|n| NavSlot::empty_for(n))
            .collect();
        Self {
            metadata,
            entity_type: entity_type.name_arc(),
            values,
            navigation,
            aspect: EntityAspect::new(),
        }
    }

    /// Qualified name of the entity's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.entity_type
    }

    /// The metadata store the entity was built from.
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Current schema of the entity's type.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the type is no longer registered.
    pub fn entity_type(&self) -> Result<Arc<EntityType>> {
        self.metadata.get_entity_type(&self.entity_type)
    }

    /// The tracking aspect.
    #[must_use]
    pub fn entity_aspect(&self) -> &EntityAspect {
        &self.aspect
    }

    /// Shorthand for `entity_aspect().state()`.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.aspect.state
    }

    /// Reads a data property.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown data property.
    pub fn get(&self, name: &str) -> Result<Value> {
        let et = self.entity_type()?;
        let (ordinal, _) = et.require_data_property(name)?;
        Ok(self.value_at(&et, ordinal))
    }

    /// Writes a data property of an entity that is not in a cache.
    ///
    /// The value is coerced to the property's type and subscribers are
    /// notified; nothing is tracked. Entities held by a cache are written
    /// through the cache instead.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown property, `TypeMismatch` for a value
    /// of the wrong type, or `StateConflict` if the entity is attached.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.aspect.state.is_attached() {
            return Err(Error::state_conflict("directly write", self.aspect.state));
        }
        let et = self.entity_type()?;
        let (ordinal, property) = et.require_data_property(name)?;
        let value = if property.is_complex() {
            crate::cache::check_complex(property, value.into())?
        } else {
            property.coerce(value.into())?
        };
        let old = self.value_at(&et, ordinal);
        if old == value {
            return Ok(());
        }
        self.set_value_at(&et, ordinal, value.clone());
        self.aspect.property_changed.publish(&PropertyChangedEvent {
            entity: None,
            property_name: name.to_string(),
            old_value: PropertyValue::Data(old),
            new_value: PropertyValue::Data(value),
        });
        Ok(())
    }

    /// Current key of the entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the type is no longer registered.
    pub fn key(&self) -> Result<EntityKey> {
        let et = self.entity_type()?;
        Ok(self.key_for(&et))
    }

    /// Subscribes to property changes of this instance.
    pub fn subscribe_property_changed<F>(&mut self, callback: F) -> SubscriptionToken
    where
        F: Fn(&PropertyChangedEvent) + Send + Sync + 'static,
    {
        self.aspect.property_changed.subscribe(callback)
    }

    /// Removes a property-change subscription.
    pub fn unsubscribe_property_changed(&mut self, token: SubscriptionToken) -> bool {
        self.aspect.property_changed.unsubscribe(token)
    }

    // Internal accessors used by the cache.

    /// Copy that keeps every subscriber of this instance and its collections.
    pub(crate) fn share(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            entity_type: Arc::clone(&self.entity_type),
            values: self.values.clone(),
            navigation: self.navigation.iter().map(NavSlot::share).collect(),
            aspect: self.aspect.share(),
        }
    }

    pub(crate) fn key_for(&self, et: &EntityType) -> EntityKey {
        et.key_from(
            et.key_ordinals()
                .iter()
                .map(|&i| self.value_at(et, i))
                .collect(),
        )
    }

    pub(crate) fn value_at(&self, et: &EntityType, ordinal: usize) -> Value {
        match self.values.get(ordinal) {
            Some(v) => v.clone(),
            None => self.metadata.initial_value(&et.data_properties()[ordinal]),
        }
    }

    pub(crate) fn set_value_at(&mut self, et: &EntityType, ordinal: usize, value: Value) {
        while self.values.len() <= ordinal {
            let next = et.data_properties()[self.values.len()].as_ref();
            let default = self.metadata.initial_value(next);
            self.values.push(default);
        }
        self.values[ordinal] = value;
    }

    pub(crate) fn nav(&self, ordinal: usize) -> Option<&NavSlot> {
        self.navigation.get(ordinal)
    }

    pub(crate) fn reference(&self, ordinal: usize) -> Option<EntityId> {
        match self.navigation.get(ordinal) {
            Some(NavSlot::Reference(r)) => *r,
            _ => None,
        }
    }

    pub(crate) fn collection(&self, ordinal: usize) -> &[EntityId] {
        match self.navigation.get(ordinal) {
            Some(NavSlot::Collection(c)) => &c.items,
            _ => &[],
        }
    }

    pub(crate) fn nav_mut(&mut self, et: &EntityType, ordinal: usize) -> &mut NavSlot {
        while self.navigation.len() <= ordinal {
            let next = &et.navigation_properties()[self.navigation.len()];
            self.navigation.push(NavSlot::empty_for(next));
        }
        &mut self.navigation[ordinal]
    }

    pub(crate) fn set_reference(
        &mut self,
        et: &EntityType,
        ordinal: usize,
        target: Option<EntityId>,
    ) {
        *self.nav_mut(et, ordinal) = NavSlot::Reference(target);
    }

    pub(crate) fn relation_array_mut(
        &mut self,
        et: &EntityType,
        ordinal: usize,
    ) -> Option<&mut RelationArray> {
        match self.nav_mut(et, ordinal) {
            NavSlot::Collection(c) => Some(c),
            NavSlot::Reference(_) => None,
        }
    }
}

/// Property values supplied when creating an entity.
///
/// Data properties take values; to-one navigations take an [`EntityId`];
/// to-many navigations take a `Vec<EntityId>`.
#[derive(Clone, Debug, Default)]
pub struct InitialValues {
    entries: Vec<(String, PropertyValue)>,
}

impl InitialValues {
    /// Creates an empty set of values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns true if no values were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
