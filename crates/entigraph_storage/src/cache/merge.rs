//! Merging entities that arrive from outside the cache: query results,
//! imported bundles, and the results of a save.

use std::collections::BTreeMap;
use std::sync::Arc;

use entigraph_foundation::{EntityId, EntityKey, EntityState, Error, Result, Value};
use tracing::debug;

use super::properties::WriteOrigin;
use super::{check_complex, Cache};
use crate::config::MergeStrategy;
use crate::metadata::EntityType;

/// A flat entity record to merge into a cache.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingEntity {
    /// Qualified or short entity type name.
    pub entity_type: String,
    /// Data property values by name. Navigations are carried by foreign keys.
    pub values: BTreeMap<String, Value>,
    /// Original values of changed properties.
    pub original_values: BTreeMap<String, Value>,
    /// State the entity should end up in.
    pub state: EntityState,
    /// True if the key is a temporary key.
    pub has_temp_key: bool,
    /// True if the record came from a query.
    pub was_loaded: bool,
}

impl IncomingEntity {
    /// Creates an incoming record with no values.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, state: EntityState) -> Self {
        Self {
            entity_type: entity_type.into(),
            values: BTreeMap::new(),
            original_values: BTreeMap::new(),
            state,
            has_temp_key: false,
            was_loaded: false,
        }
    }

    /// Adds a data value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Adds an original value.
    #[must_use]
    pub fn with_original(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.original_values.insert(name.into(), value.into());
        self
    }

    /// Marks the key as temporary.
    #[must_use]
    pub fn with_temp_key(mut self) -> Self {
        self.has_temp_key = true;
        self
    }
}

/// What a merge did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The entity the record ended up in.
    pub id: EntityId,
    /// True if a new entity was attached.
    pub created: bool,
    /// True if values were written to an existing entity.
    pub merged: bool,
}

/// Server response to a save.
#[derive(Clone, Debug, Default)]
pub struct SaveResult {
    /// Saved entities.
    pub entities: Vec<SavedEntity>,
}

/// One saved entity and the values the server assigned.
#[derive(Clone, Debug)]
pub struct SavedEntity {
    /// The entity that was saved.
    pub id: EntityId,
    /// Permanent key values, if the server assigned new ones.
    pub key_values: Option<Vec<Value>>,
    /// Other values the server computed.
    pub values: BTreeMap<String, Value>,
}

impl SavedEntity {
    /// A saved entity with no server-assigned values.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            key_values: None,
            values: BTreeMap::new(),
        }
    }

    /// Sets the permanent key values.
    #[must_use]
    pub fn with_key(mut self, values: Vec<Value>) -> Self {
        self.key_values = Some(values);
        self
    }

    /// Adds a server-computed value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl Cache {
    /// Merges one incoming record.
    ///
    /// A record with no attached match is attached in its own state. A
    /// match is reconciled according to `strategy`: `OverwriteChanges`
    /// replaces values and state, `PreserveChanges` does so only for
    /// unchanged entities, `SkipMerge` leaves the match alone, and
    /// `Disallowed` fails.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown type or property, `StateConflict`
    /// for a `Detached` record, or `IntegrityViolation` under `Disallowed`.
    pub fn merge_incoming(
        &mut self,
        incoming: IncomingEntity,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome> {
        self.transaction(|cache| cache.merge_incoming_internal(incoming, strategy))
    }

    /// Merges query results as `Unchanged`, loaded entities using the
    /// configured query merge strategy.
    ///
    /// # Errors
    ///
    /// See [`Cache::merge_incoming`].
    pub fn merge_query_results(&mut self, records: Vec<IncomingEntity>) -> Result<Vec<EntityId>> {
        let strategy = self.config.query_merge_strategy;
        self.transaction(|cache| {
            records
                .into_iter()
                .map(|mut record| {
                    record.state = EntityState::Unchanged;
                    record.was_loaded = true;
                    cache.merge_incoming_internal(record, strategy).map(|o| o.id)
                })
                .collect()
        })
    }

    pub(crate) fn merge_incoming_internal(
        &mut self,
        incoming: IncomingEntity,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome> {
        if incoming.state.is_detached() {
            return Err(Error::state_conflict("merge", incoming.state));
        }
        let et = self.metadata.get_entity_type(&incoming.entity_type)?;
        if let Some(name) = incoming.values.keys().find(|n| et.data_property(n).is_none()) {
            return Err(Error::property_not_found(et.name(), name));
        }
        let key = Self::incoming_key(&et, &incoming)?;

        let Some(local) = self.find_entity_by_key(&key) else {
            let entity = self.metadata.create_entity(et.name())?;
            let id = self.insert_record(entity);
            self.write_incoming(id, &et, &incoming)?;
            self.attach_record(id, incoming.state)?;
            self.finish_incoming(id, &key, incoming)?;
            debug!(entity_type = et.name(), key = %key, "merged new entity");
            return Ok(MergeOutcome {
                id,
                created: true,
                merged: true,
            });
        };

        let overwrite = match strategy {
            MergeStrategy::OverwriteChanges => true,
            MergeStrategy::PreserveChanges => !self.state_of(local)?.is_changed(),
            MergeStrategy::SkipMerge => false,
            MergeStrategy::Disallowed => return Err(Error::duplicate_key(&key)),
        };
        if !overwrite {
            return Ok(MergeOutcome {
                id: local,
                created: false,
                merged: false,
            });
        }
        self.write_incoming(local, &et, &incoming)?;
        self.set_state_for_merge(local, incoming.state)?;
        self.finish_incoming(local, &key, incoming)?;
        debug!(entity_type = et.name(), key = %key, "merged into existing entity");
        Ok(MergeOutcome {
            id: local,
            created: false,
            merged: true,
        })
    }

    fn incoming_key(et: &EntityType, incoming: &IncomingEntity) -> Result<EntityKey> {
        let values = et
            .key_properties()
            .map(|p| p.coerce(incoming.values.get(&p.name).cloned().unwrap_or_default()))
            .collect::<Result<Vec<_>>>()?;
        Ok(et.key_from(values))
    }

    /// Writes incoming data values. Unmapped properties the record leaves
    /// out are reset to null.
    fn write_incoming(
        &mut self,
        id: EntityId,
        et: &Arc<EntityType>,
        incoming: &IncomingEntity,
    ) -> Result<()> {
        for (ordinal, property) in et.data_properties().iter().enumerate() {
            let value = match incoming.values.get(&property.name) {
                Some(value) if property.is_complex() => check_complex(property, value.clone())?,
                Some(value) => property.coerce(value.clone())?,
                None if property.is_unmapped => Value::Null,
                None => continue,
            };
            self.write_data(id, et, ordinal, value, &property.name, WriteOrigin::Merge)?;
        }
        Ok(())
    }

    fn finish_incoming(
        &mut self,
        id: EntityId,
        key: &EntityKey,
        incoming: IncomingEntity,
    ) -> Result<()> {
        if incoming.has_temp_key {
            self.key_generator.register_temp_key(key.clone());
        }
        let record = self.record_mut(id)?;
        record.aspect.has_temp_key = incoming.has_temp_key;
        record.aspect.was_loaded |= incoming.was_loaded;
        let keeps_originals = incoming.state.is_modified() || incoming.state.is_deleted();
        record.aspect.original_values = if keeps_originals {
            incoming.original_values
        } else {
            BTreeMap::new()
        };
        Ok(())
    }

    /// Applies a save result: saved entities take their permanent keys and
    /// server values, then their changes are accepted.
    ///
    /// Returns each replaced temporary key with its permanent key.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for an uncoercible value, or
    /// `IntegrityViolation` if a permanent key collides.
    pub fn apply_save_result(
        &mut self,
        result: SaveResult,
    ) -> Result<Vec<(EntityKey, EntityKey)>> {
        self.transaction(|cache| {
            let mut remapped = Vec::new();
            for saved in &result.entities {
                let et = cache.entity_type_of(saved.id)?;
                if let Some(key_values) = &saved.key_values {
                    let old_key = cache.record(saved.id)?.key_for(&et);
                    for (&ordinal, value) in et.key_ordinals().iter().zip(key_values) {
                        let property = Arc::clone(&et.data_properties()[ordinal]);
                        let value = property.coerce(value.clone())?;
                        cache.write_data(
                            saved.id,
                            &et,
                            ordinal,
                            value,
                            &property.name,
                            WriteOrigin::Merge,
                        )?;
                    }
                    let new_key = cache.record(saved.id)?.key_for(&et);
                    if new_key != old_key {
                        cache
                            .key_generator
                            .record_permanent_key(old_key.clone(), new_key.clone());
                        remapped.push((old_key, new_key));
                    }
                }
                for (name, value) in &saved.values {
                    cache.set_value_internal(saved.id, name, value.clone(), WriteOrigin::Merge)?;
                }
            }
            for saved in &result.entities {
                cache.accept_record(saved.id)?;
            }
            debug!(saved = result.entities.len(), remapped = remapped.len(), "applied save result");
            Ok(remapped)
        })
    }
}
