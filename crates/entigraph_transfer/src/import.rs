//! Importing bundles into a cache.
//!
//! An import runs as one cache transaction. The version hook runs first,
//! then the embedded metadata is registered, then every entity is decoded
//! against its type. If any step fails, the cache and the metadata store
//! are put back as they were. Temporary keys are re-issued by the target cache's
//! generator and foreign keys that pointed at them are rewritten before
//! any entity is merged, so relationships survive the move intact.

use std::collections::{HashMap, HashSet};
use std::fmt;

use entigraph_foundation::{
    ComplexValue, EntityId, EntityKey, EntityState, Error, ErrorContext, ErrorKind, Result, Value,
};
use entigraph_storage::{Cache, IncomingEntity, MergeStrategy, MetadataStore};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::bundle::Bundle;

/// Version descriptor handed to the metadata version hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataVersionInfo {
    /// Metadata format version of the exporting store.
    pub metadata_version: String,
    /// Name of the exporting metadata store.
    pub metadata_store_name: Option<String>,
}

impl From<&Bundle> for MetadataVersionInfo {
    fn from(bundle: &Bundle) -> Self {
        Self {
            metadata_version: bundle.metadata_version.clone(),
            metadata_store_name: bundle.metadata_store_name.clone(),
        }
    }
}

/// Hook that accepts or rejects a bundle's metadata version.
pub type MetadataVersionFn =
    Box<dyn Fn(&MetadataVersionInfo) -> std::result::Result<(), String> + Send + Sync>;

/// Import settings.
#[derive(Default)]
pub struct ImportOptions {
    /// How incoming entities merge into matching local ones.
    pub merge_strategy: MergeStrategy,
    /// Merge incoming `Added` entities into matching local ones instead of
    /// importing them as new entities.
    pub merge_adds: bool,
    /// Version hook run before anything is applied.
    pub metadata_version_fn: Option<MetadataVersionFn>,
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("merge_strategy", &self.merge_strategy)
            .field("merge_adds", &self.merge_adds)
            .field("metadata_version_fn", &self.metadata_version_fn.is_some())
            .finish()
    }
}

impl ImportOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge strategy.
    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Sets whether added entities merge.
    #[must_use]
    pub fn with_merge_adds(mut self, merge_adds: bool) -> Self {
        self.merge_adds = merge_adds;
        self
    }

    /// Installs the version hook.
    #[must_use]
    pub fn with_metadata_version_fn<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MetadataVersionInfo) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.metadata_version_fn = Some(Box::new(hook));
        self
    }
}

/// What an import did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// The local entity for each imported record, in bundle order.
    pub entities: Vec<EntityId>,
    /// Incoming temporary keys and the local keys that replaced them.
    pub temp_key_mapping: HashMap<EntityKey, EntityKey>,
}

/// A decoded bundle entity plus whether it merges as an added entity.
struct Pending {
    incoming: IncomingEntity,
    merge_add: bool,
}

/// Imports a bundle into a cache.
///
/// Entities with a temporary key always receive a fresh local temporary
/// key, unless `merge_adds` is set and an entity with the incoming key
/// already exists. Values for properties the target type does not declare
/// are skipped with a warning.
///
/// # Errors
///
/// Returns `VersionMismatch` if the version hook rejects the bundle,
/// `NotFound` for an unknown entity type, `TypeMismatch` for an undecodable
/// value, `StateConflict` for a detached record, or `IntegrityViolation`
/// under [`MergeStrategy::Disallowed`]. Errors raised by an entity carry
/// an [`ErrorContext`] naming its type. On error the cache and its metadata
/// store are unchanged.
pub fn import_entities(
    cache: &mut Cache,
    bundle: &Bundle,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let checkpoint = bundle.metadata.as_ref().map(|_| cache.metadata().checkpoint());
    let result = import_into(cache, bundle, options);
    if let (Err(err), Some(checkpoint)) = (&result, checkpoint) {
        debug!(error = %err, "import failed, restoring metadata");
        cache.metadata().restore(checkpoint);
    }
    result
}

fn import_into(
    cache: &mut Cache,
    bundle: &Bundle,
    options: &ImportOptions,
) -> Result<ImportResult> {
    cache.transaction(|cache| {
        if let Some(hook) = &options.metadata_version_fn {
            hook(&MetadataVersionInfo::from(bundle))
                .map_err(|reason| Error::new(ErrorKind::VersionMismatch(reason)))?;
        }
        if let Some(doc) = &bundle.metadata {
            cache.metadata().import_metadata_document(doc)?;
        }

        let mut pending = decode_bundle(cache.metadata(), bundle)?;
        let temp_key_mapping = reissue_temp_keys(cache, &mut pending, options)?;
        rewrite_foreign_keys(cache.metadata(), &mut pending, &temp_key_mapping)?;

        let mut result = ImportResult {
            entities: Vec::with_capacity(pending.len()),
            temp_key_mapping,
        };
        let mut created = 0_usize;
        for Pending {
            incoming,
            merge_add,
        } in pending
        {
            let strategy = if merge_add {
                MergeStrategy::OverwriteChanges
            } else {
                options.merge_strategy
            };
            let context = import_context(&incoming.entity_type)
                .with_key(key_of(cache.metadata(), &incoming)?);
            let outcome = cache
                .merge_incoming(incoming, strategy)
                .map_err(|e| e.with_context(context))?;
            created += usize::from(outcome.created);
            result.entities.push(outcome.id);
        }
        debug!(
            entities = result.entities.len(),
            created,
            remapped = result.temp_key_mapping.len(),
            "imported entities"
        );
        Ok(result)
    })
}

/// Parses a JSON bundle and imports it.
///
/// # Errors
///
/// Returns `Serialization` for malformed text, or any error of
/// [`import_entities`].
pub fn import_entities_from_str(
    cache: &mut Cache,
    json: &str,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let bundle = Bundle::from_json(json)?;
    import_entities(cache, &bundle, options)
}

fn import_context(entity_type: &str) -> ErrorContext {
    ErrorContext::new()
        .with_operation("import")
        .with_entity_type(entity_type)
}

fn decode_bundle(metadata: &MetadataStore, bundle: &Bundle) -> Result<Vec<Pending>> {
    let mut pending = Vec::with_capacity(bundle.entity_count());
    for group in &bundle.entity_groups {
        let et = metadata
            .get_entity_type(&group.entity_type)
            .map_err(|e| e.with_context(import_context(&group.entity_type)))?;
        let in_type = |e: Error| e.with_context(import_context(et.name()));
        for exported in &group.entities {
            let mut incoming = IncomingEntity::new(et.name(), exported.entity_state);
            incoming.has_temp_key = exported.has_temp_key;
            for (name, json) in &exported.values {
                let Some(property) = et.data_property(name) else {
                    warn!(
                        entity_type = et.name(),
                        property = name.as_str(),
                        "skipping value for unknown property"
                    );
                    continue;
                };
                let value = decode_value(metadata, property, json).map_err(in_type)?;
                incoming.values.insert(name.clone(), value);
            }
            for (name, json) in &exported.original_values {
                if let Some(property) = et.data_property(name) {
                    let value = decode_value(metadata, property, json).map_err(in_type)?;
                    incoming.original_values.insert(name.clone(), value);
                }
            }
            pending.push(Pending {
                incoming,
                merge_add: false,
            });
        }
    }
    Ok(pending)
}

fn decode_value(
    metadata: &MetadataStore,
    property: &entigraph_storage::DataProperty,
    json: &Json,
) -> Result<Value> {
    let Some(complex_name) = &property.complex_type_name else {
        return property.data_type.decode_json(json);
    };
    let ct = metadata.get_complex_type(complex_name)?;
    let fields = match json {
        Json::Object(fields) => Some(fields),
        Json::Null => None,
        other => {
            return Err(Error::type_mismatch(
                property.data_type,
                format!("{other} for complex property '{}'", property.name),
            ));
        }
    };
    let mut value = ComplexValue::new(ct.name());
    for field in ct.data_properties() {
        let decoded = match fields.and_then(|f| f.get(&field.name)) {
            Some(json) => decode_value(metadata, field, json)?,
            None => metadata.initial_value(field),
        };
        value.set(field.name.clone(), decoded);
    }
    Ok(Value::Complex(value))
}

fn key_of(metadata: &MetadataStore, incoming: &IncomingEntity) -> Result<EntityKey> {
    let et = metadata.get_entity_type(&incoming.entity_type)?;
    let values = et
        .key_properties()
        .map(|p| incoming.values.get(&p.name).cloned().unwrap_or_default())
        .collect();
    Ok(et.key_from(values))
}

/// Gives every temporary-keyed record a fresh local key.
fn reissue_temp_keys(
    cache: &mut Cache,
    pending: &mut [Pending],
    options: &ImportOptions,
) -> Result<HashMap<EntityKey, EntityKey>> {
    let mut mapping = HashMap::new();
    let mut issued = HashSet::new();
    for entry in pending.iter_mut().filter(|p| p.incoming.has_temp_key) {
        let key = key_of(cache.metadata(), &entry.incoming)?;
        if options.merge_adds
            && entry.incoming.state == EntityState::Added
            && cache.find_entity_by_key(&key).is_some()
        {
            entry.merge_add = true;
            continue;
        }

        let et = cache.metadata().get_entity_type(&entry.incoming.entity_type)?;
        let (fresh_key, fresh_value) = loop {
            let value = cache.key_generator_mut().generate_temp_key_value(&et)?;
            let candidate = et.key_from(vec![value.clone()]);
            if cache.find_entity_by_key(&candidate).is_none() && !issued.contains(&candidate) {
                break (candidate, value);
            }
        };
        if let Some(key_property) = et.key_properties().next() {
            entry
                .incoming
                .values
                .insert(key_property.name.clone(), fresh_value);
        }
        issued.insert(fresh_key.clone());
        mapping.insert(key, fresh_key);
    }
    Ok(mapping)
}

/// Points foreign keys that referenced a reissued temporary key at its
/// replacement.
fn rewrite_foreign_keys(
    metadata: &MetadataStore,
    pending: &mut [Pending],
    mapping: &HashMap<EntityKey, EntityKey>,
) -> Result<()> {
    if mapping.is_empty() {
        return Ok(());
    }
    for entry in pending.iter_mut() {
        let et = metadata.get_entity_type(&entry.incoming.entity_type)?;
        for nav in et.navigation_properties() {
            if !nav.is_scalar || nav.foreign_key_names.is_empty() {
                continue;
            }
            let target = metadata.get_entity_type(&nav.entity_type_name)?;
            let values = nav
                .foreign_key_names
                .iter()
                .map(|fk| entry.incoming.values.get(fk).cloned().unwrap_or_default())
                .collect::<Vec<_>>();
            let Some(replacement) = mapping.get(&target.key_from(values)) else {
                continue;
            };
            for (fk, value) in nav.foreign_key_names.iter().zip(replacement.values()) {
                entry.incoming.values.insert(fk.clone(), value.clone());
            }
        }
    }
    Ok(())
}
