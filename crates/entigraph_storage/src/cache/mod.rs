//! The tracked entity cache.
//!
//! A [`Cache`] owns an arena of entity records, indexes attached records by
//! [`EntityKey`] within per-type groups, and keeps relationships consistent
//! as entities are attached, edited, deleted, and detached.
//!
//! Every public mutation runs as a transaction: the cache is cloned up front
//! (cheap, the record arena and indices are persistent maps) and restored if
//! the operation fails. Change notifications are queued while an operation
//! runs and delivered only when it succeeds.

mod fixup;
mod lifecycle;
mod merge;
mod properties;

use std::ops::Deref;
use std::sync::Arc;

use entigraph_foundation::{
    DataType, EntityId, EntityKey, EntityState, Error, Result, Value,
};
use tracing::debug;

use crate::arena::Arena;
use crate::config::CacheConfig;
use crate::events::{
    ArrayChangedEvent, PropertyChangedEvent, PropertyValue, SubscriptionToken,
};
use crate::instance::{Entity, NavSlot};
use crate::key_generator::KeyGenerator;
use crate::metadata::{DataProperty, EntityType, MetadataStore};

pub use merge::{IncomingEntity, MergeOutcome, SaveResult, SavedEntity};

use fixup::UnattachedChildren;

/// Selects entity types for cache queries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TypeFilter {
    /// Every entity type.
    #[default]
    All,
    /// Only the named types (qualified or short names).
    Only(Vec<String>),
}

impl From<&str> for TypeFilter {
    fn from(name: &str) -> Self {
        Self::Only(vec![name.to_string()])
    }
}

impl From<String> for TypeFilter {
    fn from(name: String) -> Self {
        Self::Only(vec![name])
    }
}

impl From<&[&str]> for TypeFilter {
    fn from(names: &[&str]) -> Self {
        Self::Only(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for TypeFilter {
    fn from(names: [&str; N]) -> Self {
        Self::Only(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl From<Vec<String>> for TypeFilter {
    fn from(names: Vec<String>) -> Self {
        Self::Only(names)
    }
}

impl From<&EntityType> for TypeFilter {
    fn from(ty: &EntityType) -> Self {
        Self::Only(vec![ty.name().to_string()])
    }
}

/// Attached entities of one type.
#[derive(Clone, Debug, Default)]
struct EntityGroup {
    by_key: im::HashMap<EntityKey, EntityId>,
    order: im::OrdMap<u64, EntityId>,
}

/// An entity held by the cache.
///
/// Copies made for snapshots and copy-on-write keep the entity's
/// subscribers, unlike [`Entity`]'s own `Clone`.
#[derive(Debug)]
struct Record(Entity);

impl Clone for Record {
    fn clone(&self) -> Self {
        Self(self.0.share())
    }
}

impl Deref for Record {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.0
    }
}

#[derive(Clone, Debug)]
enum Notification {
    Property(EntityId, PropertyChangedEvent),
    Array {
        ordinal: usize,
        event: ArrayChangedEvent,
    },
}

/// In-memory identity map of tracked entities.
///
/// Clone is cheap due to structural sharing; a clone is an independent
/// snapshot of the cache.
#[derive(Clone, Debug)]
pub struct Cache {
    /// Shared type registry.
    metadata: MetadataStore,
    /// Settings.
    config: CacheConfig,
    /// Record slot allocation.
    arena: Arena,
    /// Records, attached and detached.
    records: im::HashMap<EntityId, Record>,
    /// Attached records by type name.
    groups: im::HashMap<Arc<str>, EntityGroup>,
    /// Temporary key source.
    key_generator: KeyGenerator,
    /// Children whose parent key is not attached yet.
    unattached: UnattachedChildren,
    /// Attach order counter.
    next_seq: u64,
    /// Notifications queued by the running operation.
    pending: Vec<Notification>,
    /// Transaction nesting depth.
    depth: u32,
}

impl Cache {
    /// Creates an empty cache over a metadata store.
    #[must_use]
    pub fn new(metadata: MetadataStore) -> Self {
        Self::with_config(metadata, CacheConfig::default())
    }

    /// Creates an empty cache with explicit settings.
    #[must_use]
    pub fn with_config(metadata: MetadataStore, config: CacheConfig) -> Self {
        Self {
            metadata,
            key_generator: KeyGenerator::with_seed(config.temp_key_seed),
            config,
            arena: Arena::new(),
            records: im::HashMap::new(),
            groups: im::HashMap::new(),
            unattached: UnattachedChildren::default(),
            next_seq: 0,
            pending: Vec::new(),
            depth: 0,
        }
    }

    /// The metadata store.
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// The settings.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The temporary key generator.
    #[must_use]
    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Mutable access to the temporary key generator.
    pub fn key_generator_mut(&mut self) -> &mut KeyGenerator {
        &mut self.key_generator
    }

    // =========================================================================
    // Transactions and notifications
    // =========================================================================

    /// Runs `f` atomically.
    ///
    /// If `f` fails, the cache is restored to its state before the call and
    /// queued notifications are dropped. If it succeeds, queued notifications
    /// are delivered. Nested calls join the outermost transaction.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Cache) -> Result<T>) -> Result<T> {
        if self.depth > 0 {
            return f(self);
        }
        let snapshot = self.clone();
        self.depth = 1;
        let result = f(self);
        self.depth = 0;
        match result {
            Ok(value) => {
                self.flush_notifications();
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "cache operation rolled back");
                *self = snapshot;
                Err(err)
            }
        }
    }

    pub(crate) fn queue_property(
        &mut self,
        id: EntityId,
        property_name: &str,
        old_value: PropertyValue,
        new_value: PropertyValue,
    ) {
        self.pending.push(Notification::Property(
            id,
            PropertyChangedEvent {
                entity: Some(id),
                property_name: property_name.to_string(),
                old_value,
                new_value,
            },
        ));
    }

    /// Queues a collection change, folding it into an earlier change of the
    /// same collection in this operation.
    pub(crate) fn queue_array(
        &mut self,
        id: EntityId,
        ordinal: usize,
        navigation: &str,
        added: &[EntityId],
        removed: &[EntityId],
    ) {
        let index = self.pending.iter().position(|n| match n {
            Notification::Array { ordinal: o, event } => *o == ordinal && event.entity == id,
            _ => false,
        });
        let index = index.unwrap_or_else(|| {
            self.pending.push(Notification::Array {
                ordinal,
                event: ArrayChangedEvent {
                    entity: id,
                    navigation: navigation.to_string(),
                    added: Vec::new(),
                    removed: Vec::new(),
                },
            });
            self.pending.len() - 1
        });
        let Notification::Array { event, .. } = &mut self.pending[index] else {
            return;
        };
        for item in added {
            if let Some(pos) = event.removed.iter().position(|r| r == item) {
                event.removed.remove(pos);
            } else if !event.added.contains(item) {
                event.added.push(*item);
            }
        }
        for item in removed {
            if let Some(pos) = event.added.iter().position(|a| a == item) {
                event.added.remove(pos);
            } else if !event.removed.contains(item) {
                event.removed.push(*item);
            }
        }
    }

    fn flush_notifications(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for notification in pending {
            match notification {
                Notification::Property(id, event) => {
                    if let Some(record) = self.records.get(&id) {
                        record.aspect.property_changed.publish(&event);
                    }
                }
                Notification::Array { ordinal, event } => {
                    if event.added.is_empty() && event.removed.is_empty() {
                        continue;
                    }
                    if let Some(NavSlot::Collection(array)) =
                        self.records.get(&event.entity).and_then(|r| r.nav(ordinal))
                    {
                        array.array_changed.publish(&event);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub(crate) fn record(&self, id: EntityId) -> Result<&Entity> {
        self.arena.validate(id)?;
        self.records
            .get(&id)
            .map(|r| &r.0)
            .ok_or_else(|| Error::entity_not_found(id))
    }

    pub(crate) fn record_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.arena.validate(id)?;
        self.records
            .get_mut(&id)
            .map(|r| &mut r.0)
            .ok_or_else(|| Error::entity_not_found(id))
    }

    pub(crate) fn entity_type_of(&self, id: EntityId) -> Result<Arc<EntityType>> {
        self.metadata.get_entity_type(self.record(id)?.type_name())
    }

    pub(crate) fn state_of(&self, id: EntityId) -> Result<EntityState> {
        Ok(self.record(id)?.aspect.state)
    }

    pub(crate) fn insert_record(&mut self, mut entity: Entity) -> EntityId {
        entity.aspect.state = EntityState::Detached;
        let id = self.arena.allocate();
        self.records.insert(id, Record(entity));
        id
    }

    fn index_insert(&mut self, et: &EntityType, key: EntityKey, id: EntityId, seq: u64) {
        let group = self.groups.entry(et.name_arc()).or_default();
        group.by_key.insert(key, id);
        group.order.insert(seq, id);
    }

    fn index_remove(&mut self, et: &EntityType, key: &EntityKey, seq: u64) {
        if let Some(group) = self.groups.get_mut(et.name()) {
            group.by_key.remove(key);
            group.order.remove(&seq);
        }
    }

    /// Returns a record by handle. Detached records remain readable.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn entity(&self, id: EntityId) -> Result<&Entity> {
        self.record(id)
    }

    /// Returns the tracking state of an entity.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn state(&self, id: EntityId) -> Result<EntityState> {
        self.state_of(id)
    }

    /// Returns the current key of an entity.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn entity_key(&self, id: EntityId) -> Result<EntityKey> {
        let et = self.entity_type_of(id)?;
        Ok(self.record(id)?.key_for(&et))
    }

    /// Number of attached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(|g| g.by_key.len()).sum()
    }

    /// Returns true if no entity is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Finds the attached entity with a key.
    #[must_use]
    pub fn find_entity_by_key(&self, key: &EntityKey) -> Option<EntityId> {
        self.groups
            .get(key.entity_type())
            .and_then(|g| g.by_key.get(key))
            .copied()
    }

    /// Finds the attached entity of a type with the given key values.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown type, or `TypeMismatch` if a value
    /// does not fit its key property.
    pub fn get_entity_by_key(
        &self,
        type_name: &str,
        values: Vec<Value>,
    ) -> Result<Option<EntityId>> {
        let et = self.metadata.get_entity_type(type_name)?;
        let values = et
            .key_properties()
            .zip(values)
            .map(|(p, v)| p.coerce(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.find_entity_by_key(&et.key_from(values)))
    }

    fn resolve_filter(&self, types: TypeFilter) -> Result<Option<Vec<Arc<EntityType>>>> {
        match types {
            TypeFilter::All => Ok(None),
            TypeFilter::Only(names) => names
                .iter()
                .map(|n| self.metadata.get_entity_type(n))
                .collect::<Result<Vec<_>>>()
                .map(Some),
        }
    }

    /// Attached entities of the given types whose state is one of `states`.
    ///
    /// An empty `states` slice matches every attached state. Entities are
    /// returned in attach order within each type.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first unknown type.
    pub fn get_entities(
        &self,
        types: impl Into<TypeFilter>,
        states: &[EntityState],
    ) -> Result<Vec<EntityId>> {
        let ids: Vec<EntityId> = match self.resolve_filter(types.into())? {
            None => {
                let mut all: Vec<(u64, EntityId)> = self
                    .groups
                    .values()
                    .flat_map(|g| g.order.iter().map(|(s, id)| (*s, *id)))
                    .collect();
                all.sort_unstable_by_key(|(seq, _)| *seq);
                all.into_iter().map(|(_, id)| id).collect()
            }
            Some(types) => types
                .iter()
                .filter_map(|t| self.groups.get(t.name()))
                .flat_map(|g| g.order.values().copied())
                .collect(),
        };
        Ok(ids
            .into_iter()
            .filter(|id| {
                states.is_empty()
                    || self
                        .records
                        .get(id)
                        .is_some_and(|r| states.contains(&r.aspect.state))
            })
            .collect())
    }

    /// Entities of the given types with pending changes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first unknown type.
    pub fn get_changes(&self, types: impl Into<TypeFilter>) -> Result<Vec<EntityId>> {
        self.get_entities(
            types,
            &[
                EntityState::Added,
                EntityState::Modified,
                EntityState::Deleted,
            ],
        )
    }

    /// Returns true if any entity of the given types has pending changes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first unknown type.
    pub fn has_changes(&self, types: impl Into<TypeFilter>) -> Result<bool> {
        Ok(!self.get_changes(types)?.is_empty())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to property changes of an entity.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn subscribe_property_changed<F>(
        &mut self,
        id: EntityId,
        callback: F,
    ) -> Result<SubscriptionToken>
    where
        F: Fn(&PropertyChangedEvent) + Send + Sync + 'static,
    {
        Ok(self.record_mut(id)?.aspect.property_changed.subscribe(callback))
    }

    /// Removes a property-change subscription. Returns false for an unknown token.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `NotFound` for an invalid handle.
    pub fn unsubscribe_property_changed(
        &mut self,
        id: EntityId,
        token: SubscriptionToken,
    ) -> Result<bool> {
        Ok(self.record_mut(id)?.aspect.property_changed.unsubscribe(token))
    }

    /// Subscribes to membership changes of a collection navigation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the navigation does not exist or is not a collection.
    pub fn subscribe_array_changed<F>(
        &mut self,
        id: EntityId,
        navigation: &str,
        callback: F,
    ) -> Result<SubscriptionToken>
    where
        F: Fn(&ArrayChangedEvent) + Send + Sync + 'static,
    {
        let et = self.entity_type_of(id)?;
        let ordinal = Self::collection_ordinal(&et, navigation)?;
        let array = self
            .record_mut(id)?
            .relation_array_mut(&et, ordinal)
            .ok_or_else(|| Error::property_not_found(et.name(), navigation))?;
        Ok(array.array_changed.subscribe(callback))
    }

    /// Removes a collection subscription. Returns false for an unknown token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the navigation does not exist or is not a collection.
    pub fn unsubscribe_array_changed(
        &mut self,
        id: EntityId,
        navigation: &str,
        token: SubscriptionToken,
    ) -> Result<bool> {
        let et = self.entity_type_of(id)?;
        let ordinal = Self::collection_ordinal(&et, navigation)?;
        Ok(self
            .record_mut(id)?
            .relation_array_mut(&et, ordinal)
            .is_some_and(|a| a.array_changed.unsubscribe(token)))
    }

    fn collection_ordinal(et: &EntityType, navigation: &str) -> Result<usize> {
        match et.require_navigation_property(navigation)? {
            (ordinal, nav) if !nav.is_scalar => Ok(ordinal),
            _ => Err(Error::property_not_found(et.name(), navigation)),
        }
    }

    // =========================================================================
    // Whole-cache operations
    // =========================================================================

    /// Detaches every entity and empties the cache.
    ///
    /// Records stay addressable as `Detached` entities. Relationships among
    /// them are left in place, so re-attaching one brings its graph along.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache is internally inconsistent.
    pub fn clear(&mut self) -> Result<()> {
        self.transaction(|cache| {
            let attached = cache.get_entities(TypeFilter::All, &[])?;
            for id in &attached {
                let record = cache.record_mut(*id)?;
                record.aspect.state = EntityState::Detached;
                record.aspect.original_values.clear();
            }
            cache.groups = im::HashMap::new();
            cache.unattached = UnattachedChildren::default();
            cache.key_generator.clear();
            debug!(count = attached.len(), "cleared cache");
            Ok(())
        })
    }

    /// Releases the slot of a detached entity; its handle becomes stale.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the entity is attached.
    pub fn forget(&mut self, id: EntityId) -> Result<()> {
        self.transaction(|cache| cache.forget_record(id))
    }

    pub(crate) fn forget_record(&mut self, id: EntityId) -> Result<()> {
        let state = self.state_of(id)?;
        if state.is_attached() {
            return Err(Error::state_conflict("forget", state));
        }
        self.records.remove(&id);
        self.arena.release(id)
    }
}

/// Checks a value written to a complex property.
pub(crate) fn check_complex(property: &DataProperty, value: Value) -> Result<Value> {
    let expected = property.complex_type_name.as_deref().unwrap_or_default();
    match &value {
        Value::Complex(c) if same_type_name(c.type_name(), expected) => Ok(value),
        other => Err(Error::type_mismatch(
            DataType::Undefined,
            format!(
                "{} for complex property '{}' of type {expected}",
                other.kind_name(),
                property.name
            ),
        )),
    }
}

fn same_type_name(a: &str, b: &str) -> bool {
    let short = |n: &str| n.split(":#").next().unwrap_or(n).to_string();
    a == b || short(a) == short(b)
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

fn key_is_unset(et: &EntityType, key: &EntityKey) -> bool {
    et.key_properties()
        .zip(key.values())
        .all(|(p, v)| v.is_null() || *v == p.data_type.default_value())
}
