//! Metadata: the registry of entity types, complex types, and their hooks.
//!
//! A [`MetadataStore`] is a cheap-clone handle. Every cache and entity built
//! from it shares one registry, so properties added after entities exist are
//! visible to those entities.

mod document;
mod types;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use entigraph_foundation::{ComplexValue, EntityId, Error, Result, Value};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::instance::Entity;

pub use document::{
    DataPropertyDocument, METADATA_FORMAT_VERSION, MetadataDocument, NavigationPropertyDocument,
    StructuralTypeDocument,
};
pub use types::{
    AutoGeneratedKeyType, ComplexType, DataProperty, DataService, EntityType, NavigationProperty,
    OnDelete, Property, StructuralType, Validator, qualify_type_name,
};

/// Constructor hook: runs on every new instance of a type.
pub type EntityCtor = Arc<dyn Fn(&mut Entity) + Send + Sync>;

/// Initializer hook: runs when a cache creates an entity, before attachment.
///
/// The entity is in the cache arena in the `Detached` state and may be
/// edited, and other entities may be created, through the cache.
pub type EntityInitializer = Arc<dyn Fn(&mut Cache, EntityId) -> Result<()> + Send + Sync>;

/// Export filter: maps a property value to the value to export, or `None` to omit it.
pub type SerializerFn = Arc<dyn Fn(&DataProperty, &Value) -> Option<Value> + Send + Sync>;

/// Hooks registered for one entity type.
#[derive(Clone, Default)]
pub struct EntityHooks {
    /// Constructor.
    pub ctor: Option<EntityCtor>,
    /// Initializer.
    pub initializer: Option<EntityInitializer>,
}

#[derive(Clone, Default)]
struct Registry {
    name: Option<String>,
    types: Vec<StructuralType>,
    by_name: HashMap<String, usize>,
    by_short_name: HashMap<String, Vec<usize>>,
    data_services: Vec<DataService>,
    resource_names: BTreeMap<String, String>,
    hooks: HashMap<String, EntityHooks>,
    serializer: Option<SerializerFn>,
}

impl Registry {
    fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(&i) = self.by_name.get(name) {
            return Some(i);
        }
        match self.by_short_name.get(name).map(Vec::as_slice) {
            Some([i]) => Some(*i),
            _ => None,
        }
    }

    fn insert(&mut self, ty: StructuralType) {
        let index = self.types.len();
        self.by_name.insert(ty.name().to_string(), index);
        self.by_short_name
            .entry(ty.short_name().to_string())
            .or_default()
            .push(index);
        self.types.push(ty);
    }
}

/// Registry contents saved by [`MetadataStore::checkpoint`].
#[must_use]
pub struct MetadataCheckpoint(Registry);

impl fmt::Debug for MetadataCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCheckpoint")
            .field("types", &self.0.types.len())
            .finish_non_exhaustive()
    }
}

/// Shared registry of structural types.
#[derive(Clone, Default)]
pub struct MetadataStore {
    inner: Arc<RwLock<Registry>>,
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.read();
        f.debug_struct("MetadataStore")
            .field("name", &registry.name)
            .field("types", &registry.types.len())
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Creates an empty metadata store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if both handles share one registry.
    #[must_use]
    pub fn same_store(&self, other: &MetadataStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.read().name.clone()
    }

    /// Sets the store name, used as the metadata descriptor in exports.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.write().name = Some(name.into());
    }

    /// Saves the registry so a failed multi-step change can be undone.
    pub fn checkpoint(&self) -> MetadataCheckpoint {
        MetadataCheckpoint(self.inner.read().clone())
    }

    /// Puts back the registry saved by [`MetadataStore::checkpoint`].
    ///
    /// Registrations made through any handle since the checkpoint are lost.
    pub fn restore(&self, checkpoint: MetadataCheckpoint) {
        *self.inner.write() = checkpoint.0;
        debug!("restored metadata checkpoint");
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().types.is_empty()
    }

    // =========================================================================
    // Type registration
    // =========================================================================

    /// Registers an entity type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if a type with the same qualified name exists.
    pub fn add_entity_type(&self, ty: EntityType) -> Result<Arc<EntityType>> {
        let ty = Arc::new(ty);
        self.add_structural_type(StructuralType::Entity(Arc::clone(&ty)))?;
        Ok(ty)
    }

    /// Registers a complex type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if a type with the same qualified name exists.
    pub fn add_complex_type(&self, ty: ComplexType) -> Result<Arc<ComplexType>> {
        let ty = Arc::new(ty);
        self.add_structural_type(StructuralType::Complex(Arc::clone(&ty)))?;
        Ok(ty)
    }

    fn add_structural_type(&self, ty: StructuralType) -> Result<()> {
        let mut registry = self.inner.write();
        if registry.by_name.contains_key(ty.name()) {
            return Err(Error::invalid_metadata(format!(
                "type already registered: {}",
                ty.name()
            )));
        }
        if let StructuralType::Entity(et) = &ty {
            if let Some(resource) = &et.default_resource_name {
                registry
                    .resource_names
                    .entry(resource.clone())
                    .or_insert_with(|| et.name().to_string());
            }
        }
        debug!(type_name = ty.name(), "registered structural type");
        registry.insert(ty);
        Ok(())
    }

    /// Adds a data property to a registered entity or complex type.
    ///
    /// Existing instances see the property with its default value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown type, or `InvalidMetadata` if the
    /// property name is taken.
    pub fn add_data_property(
        &self,
        type_name: &str,
        property: DataProperty,
    ) -> Result<Arc<DataProperty>> {
        let mut registry = self.inner.write();
        let index = registry
            .resolve(type_name)
            .ok_or_else(|| Error::type_not_found(type_name))?;
        let property = Arc::new(property);
        let updated = match &registry.types[index] {
            StructuralType::Entity(et) => {
                if et.data_property(&property.name).is_some()
                    || et.navigation_property(&property.name).is_some()
                {
                    return Err(duplicate_property(et.name(), &property.name));
                }
                let mut et = EntityType::clone(et);
                et.push_data_property(Arc::clone(&property));
                StructuralType::Entity(Arc::new(et))
            }
            StructuralType::Complex(ct) => {
                if ct.data_property(&property.name).is_some() {
                    return Err(duplicate_property(ct.name(), &property.name));
                }
                let mut ct = ComplexType::clone(ct);
                ct.push_data_property(Arc::clone(&property));
                StructuralType::Complex(Arc::new(ct))
            }
        };
        registry.types[index] = updated;
        Ok(property)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Looks up any structural type by qualified or unique short name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the type.
    pub fn get_structural_type(&self, name: &str) -> Result<StructuralType> {
        let registry = self.inner.read();
        registry
            .resolve(name)
            .map(|i| registry.types[i].clone())
            .ok_or_else(|| Error::type_not_found(name))
    }

    /// Looks up an entity type by qualified or unique short name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the type, also when the name denotes a complex type.
    pub fn get_entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.find_entity_type(name)
            .ok_or_else(|| Error::type_not_found(name))
    }

    /// Looks up an entity type, returning `None` when it is not registered.
    #[must_use]
    pub fn find_entity_type(&self, name: &str) -> Option<Arc<EntityType>> {
        let registry = self.inner.read();
        match registry.resolve(name).map(|i| &registry.types[i]) {
            Some(StructuralType::Entity(et)) => Some(Arc::clone(et)),
            _ => None,
        }
    }

    /// Looks up a complex type by qualified or unique short name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the type.
    pub fn get_complex_type(&self, name: &str) -> Result<Arc<ComplexType>> {
        let registry = self.inner.read();
        match registry.resolve(name).map(|i| &registry.types[i]) {
            Some(StructuralType::Complex(ct)) => Ok(Arc::clone(ct)),
            _ => Err(Error::type_not_found(name)),
        }
    }

    /// All entity types in registration order.
    #[must_use]
    pub fn entity_types(&self) -> Vec<Arc<EntityType>> {
        self.inner
            .read()
            .types
            .iter()
            .filter_map(|t| match t {
                StructuralType::Entity(et) => Some(Arc::clone(et)),
                StructuralType::Complex(_) => None,
            })
            .collect()
    }

    /// All structural types in registration order.
    #[must_use]
    pub fn structural_types(&self) -> Vec<StructuralType> {
        self.inner.read().types.clone()
    }

    /// Resolves a dotted property path starting at a structural type.
    ///
    /// Each segment before the last must be a complex data property or a
    /// scalar navigation. The returned property is the registered object
    /// itself, so repeated lookups are identical.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first segment that does not resolve.
    pub fn get_property(&self, type_name: &str, path: &str) -> Result<Property> {
        let mut current = self.get_structural_type(type_name)?;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let property = match &current {
                StructuralType::Entity(et) => {
                    if let Some(p) = et.data_property(segment) {
                        Property::Data(Arc::clone(p))
                    } else if let Some(n) = et.navigation_property(segment) {
                        Property::Navigation(Arc::clone(n))
                    } else {
                        return Err(Error::property_not_found(et.name(), segment));
                    }
                }
                StructuralType::Complex(ct) => ct
                    .data_property(segment)
                    .map(|p| Property::Data(Arc::clone(p)))
                    .ok_or_else(|| Error::property_not_found(ct.name(), segment))?,
            };
            if segments.peek().is_none() {
                return Ok(property);
            }
            current = match &property {
                Property::Data(p) => match &p.complex_type_name {
                    Some(complex) => self.get_structural_type(complex)?,
                    None => {
                        let rest = segments.next().unwrap_or("");
                        return Err(Error::property_not_found(p.name.as_str(), rest));
                    }
                },
                Property::Navigation(n) => self.get_structural_type(&n.entity_type_name)?,
            };
        }
        Err(Error::property_not_found(type_name, path))
    }

    /// Finds the inverse of a navigation property.
    ///
    /// The inverse is named explicitly or shares the association name.
    #[must_use]
    pub fn inverse_of(&self, navigation: &NavigationProperty) -> Option<Arc<NavigationProperty>> {
        let target = self.find_entity_type(&navigation.entity_type_name)?;
        if let Some(inverse) = &navigation.inverse_name {
            return target.navigation_property(inverse).cloned();
        }
        let association = navigation.association_name.as_ref()?;
        target
            .navigation_properties()
            .iter()
            .find(|n| {
                n.association_name.as_ref() == Some(association)
                    && !std::ptr::eq(n.as_ref(), navigation)
            })
            .cloned()
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Initial value of a data property on a new instance.
    ///
    /// Complex properties get a complex value whose fields hold their own
    /// initial values; they are never null.
    #[must_use]
    pub fn initial_value(&self, property: &DataProperty) -> Value {
        let Some(complex) = &property.complex_type_name else {
            return property.scalar_default();
        };
        match self.get_complex_type(complex) {
            Ok(ct) => Value::Complex(ct.data_properties().iter().fold(
                ComplexValue::new(ct.name()),
                |value, p| value.with_field(p.name.clone(), self.initial_value(p)),
            )),
            Err(_) => {
                warn!(complex_type = complex.as_str(), "complex type is not registered");
                Value::Null
            }
        }
    }

    /// Creates a detached instance with default values and runs the type's constructor.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown entity type.
    pub fn create_entity(&self, type_name: &str) -> Result<Entity> {
        let et = self.get_entity_type(type_name)?;
        let values = et
            .data_properties()
            .iter()
            .map(|p| self.initial_value(p))
            .collect();
        let mut entity = Entity::new(self.clone(), &et, values);
        if let Some(ctor) = self.hooks(et.name()).ctor {
            ctor(&mut entity);
        }
        Ok(entity)
    }

    /// Registers the constructor and initializer hooks of an entity type.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown entity type.
    pub fn register_entity_type_ctor(
        &self,
        type_name: &str,
        ctor: Option<EntityCtor>,
        initializer: Option<EntityInitializer>,
    ) -> Result<()> {
        let et = self.get_entity_type(type_name)?;
        self.inner
            .write()
            .hooks
            .insert(et.name().to_string(), EntityHooks { ctor, initializer });
        Ok(())
    }

    /// Returns the hooks registered for a qualified type name.
    #[must_use]
    pub fn hooks(&self, qualified_name: &str) -> EntityHooks {
        self.inner
            .read()
            .hooks
            .get(qualified_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Installs the export filter applied to every data property value.
    pub fn set_serializer(&self, serializer: SerializerFn) {
        self.inner.write().serializer = Some(serializer);
    }

    /// Returns the export filter, if one is installed.
    #[must_use]
    pub fn serializer(&self) -> Option<SerializerFn> {
        self.inner.read().serializer.clone()
    }

    // =========================================================================
    // Data services and resource names
    // =========================================================================

    /// Adds a data service description, replacing one with the same name.
    pub fn add_data_service(&self, service: DataService) {
        let mut registry = self.inner.write();
        registry
            .data_services
            .retain(|s| s.service_name != service.service_name);
        registry.data_services.push(service);
    }

    /// Returns the registered data services.
    #[must_use]
    pub fn data_services(&self) -> Vec<DataService> {
        self.inner.read().data_services.clone()
    }

    /// Returns true if metadata has been recorded for the named service.
    #[must_use]
    pub fn has_metadata_for(&self, service_name: &str) -> bool {
        self.inner
            .read()
            .data_services
            .iter()
            .any(|s| s.service_name == service_name)
    }

    /// Maps a resource name to an entity type.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown entity type.
    pub fn set_entity_type_for_resource_name(&self, resource: &str, type_name: &str) -> Result<()> {
        let et = self.get_entity_type(type_name)?;
        self.inner
            .write()
            .resource_names
            .insert(resource.to_string(), et.name().to_string());
        Ok(())
    }

    /// Returns the qualified entity type name mapped to a resource name.
    #[must_use]
    pub fn entity_type_for_resource_name(&self, resource: &str) -> Option<String> {
        self.inner.read().resource_names.get(resource).cloned()
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// Imports a JSON metadata document.
    ///
    /// Types that are already registered are left as they are, so importing
    /// the same document twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON, or `InvalidMetadata` for
    /// an inconsistent document.
    pub fn import_metadata(&self, json: &str) -> Result<()> {
        self.import_metadata_document(&MetadataDocument::from_json(json)?)
    }

    /// Imports a parsed metadata document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` for an inconsistent document.
    pub fn import_metadata_document(&self, doc: &MetadataDocument) -> Result<()> {
        let parsed = doc
            .structural_types
            .iter()
            .map(StructuralTypeDocument::to_structural_type)
            .collect::<Result<Vec<_>>>()?;

        let mut added = 0usize;
        for ty in parsed {
            let existing = self.get_structural_type(ty.name()).ok();
            match existing {
                Some(existing) => {
                    if describe(&existing) != describe(&ty) {
                        warn!(
                            type_name = ty.name(),
                            "ignoring conflicting redefinition of a registered type"
                        );
                    }
                }
                None => {
                    self.add_structural_type(ty)?;
                    added += 1;
                }
            }
        }

        for service in &doc.data_services {
            self.add_data_service(service.clone());
        }
        for (resource, type_name) in &doc.resource_entity_type_map {
            self.inner
                .write()
                .resource_names
                .insert(resource.clone(), type_name.clone());
        }
        if let Some(name) = &doc.name {
            let mut registry = self.inner.write();
            if registry.name.is_none() {
                registry.name = Some(name.clone());
            }
        }
        debug!(added, total = doc.structural_types.len(), "imported metadata");
        Ok(())
    }

    /// Describes the registry as a metadata document.
    #[must_use]
    pub fn export_metadata_document(&self) -> MetadataDocument {
        let registry = self.inner.read();
        MetadataDocument {
            metadata_version: METADATA_FORMAT_VERSION.to_string(),
            name: registry.name.clone(),
            data_services: registry.data_services.clone(),
            structural_types: registry.types.iter().map(describe).collect(),
            resource_entity_type_map: registry.resource_names.clone(),
        }
    }

    /// Serializes the registry as a JSON metadata document.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn export_metadata(&self) -> Result<String> {
        self.export_metadata_document().to_json()
    }
}

fn describe(ty: &StructuralType) -> StructuralTypeDocument {
    match ty {
        StructuralType::Entity(et) => StructuralTypeDocument::from_entity_type(et),
        StructuralType::Complex(ct) => StructuralTypeDocument::from_complex_type(ct),
    }
}

fn duplicate_property(type_name: &str, property: &str) -> Error {
    Error::invalid_metadata(format!(
        "property '{property}' already exists on type '{type_name}'"
    ))
}
