//! Structural type definitions: entity types, complex types, and their properties.
//!
//! Types are built with `with_*` builders and registered with a
//! [`MetadataStore`](super::MetadataStore). Properties are shared through
//! `Arc` so that a property looked up twice is the same object.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use entigraph_foundation::{DataType, EntityKey, Error, Result, Value};
use serde::{Deserialize, Serialize};

/// How keys of new entities are produced.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoGeneratedKeyType {
    /// The client supplies keys.
    #[default]
    None,
    /// The store assigns keys on insert; a temporary key is used until then.
    Identity,
    /// A key generator assigns keys on save; a temporary key is used until then.
    KeyGenerator,
}

impl AutoGeneratedKeyType {
    /// Returns true if new entities receive temporary keys.
    #[must_use]
    pub const fn is_generated(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// What happens to children when their parent is deleted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnDelete {
    /// Children lose their navigation reference and keep their foreign key.
    #[default]
    Detach,
    /// Children are deleted along with the parent.
    Cascade,
}

/// Named validation rule descriptor attached to a type or property.
///
/// Validators are carried through metadata import/export; they are not run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Rule name, e.g. `required` or `maxLength`.
    pub name: String,
    /// Rule parameters.
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Validator {
    /// Creates a validator with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// A scalar or complex-valued property of a structural type.
#[derive(Clone, Debug, PartialEq)]
pub struct DataProperty {
    /// Property name.
    pub name: String,
    /// Declared data type (`Undefined` for complex properties).
    pub data_type: DataType,
    /// Qualified complex type name, for complex properties.
    pub complex_type_name: Option<String>,
    /// Whether null is the natural default.
    pub is_nullable: bool,
    /// Whether the property is part of the entity key.
    pub is_part_of_key: bool,
    /// Client-only property: tracked for notifications, not for changes.
    pub is_unmapped: bool,
    /// Explicit default value.
    pub default_value: Option<Value>,
    /// Maximum length for strings.
    pub max_length: Option<u32>,
    /// Whether the property carries a concurrency token.
    pub is_concurrency: bool,
    /// Validation descriptors.
    pub validators: Vec<Validator>,
}

impl DataProperty {
    /// Creates a nullable scalar property.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            complex_type_name: None,
            is_nullable: true,
            is_part_of_key: false,
            is_unmapped: false,
            default_value: None,
            max_length: None,
            is_concurrency: false,
            validators: Vec::new(),
        }
    }

    /// Creates a key property (not nullable).
    #[must_use]
    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_nullable: false,
            is_part_of_key: true,
            ..Self::new(name, data_type)
        }
    }

    /// Creates a complex-valued property.
    #[must_use]
    pub fn complex(name: impl Into<String>, complex_type_name: impl Into<String>) -> Self {
        Self {
            complex_type_name: Some(complex_type_name.into()),
            is_nullable: false,
            ..Self::new(name, DataType::Undefined)
        }
    }

    /// Creates an unmapped (client-only) property.
    #[must_use]
    pub fn unmapped(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_unmapped: true,
            ..Self::new(name, data_type)
        }
    }

    /// Sets nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = nullable;
        self
    }

    /// Sets an explicit default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks the property as a concurrency token.
    #[must_use]
    pub fn with_concurrency(mut self) -> Self {
        self.is_concurrency = true;
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Returns true for complex-valued properties.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.complex_type_name.is_some()
    }

    /// Value of this property on a freshly created scalar instance.
    ///
    /// Complex properties are materialized by the metadata store.
    #[must_use]
    pub fn scalar_default(&self) -> Value {
        match &self.default_value {
            Some(v) => v.clone(),
            None if self.is_nullable => Value::Null,
            None => self.data_type.default_value(),
        }
    }

    /// Coerces a value written to this scalar property.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value does not fit the data type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        self.data_type.coerce(value, self.is_nullable)
    }
}

/// A relationship-valued property.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationProperty {
    /// Property name.
    pub name: String,
    /// Name of the related entity type.
    pub entity_type_name: String,
    /// True for a single reference, false for a collection.
    pub is_scalar: bool,
    /// Association shared with the inverse property.
    pub association_name: Option<String>,
    /// Foreign-key data properties on this type (scalar side only).
    pub foreign_key_names: Vec<String>,
    /// Name of the inverse navigation on the related type.
    pub inverse_name: Option<String>,
    /// Policy applied to the related children when this entity is deleted.
    pub on_delete: OnDelete,
}

impl NavigationProperty {
    /// Creates a to-one navigation.
    #[must_use]
    pub fn to_one(name: impl Into<String>, entity_type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type_name: entity_type_name.into(),
            is_scalar: true,
            association_name: None,
            foreign_key_names: Vec::new(),
            inverse_name: None,
            on_delete: OnDelete::Detach,
        }
    }

    /// Creates a to-many navigation.
    #[must_use]
    pub fn to_many(name: impl Into<String>, entity_type_name: impl Into<String>) -> Self {
        Self {
            is_scalar: false,
            ..Self::to_one(name, entity_type_name)
        }
    }

    /// Sets the foreign-key property names.
    #[must_use]
    pub fn with_foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the inverse navigation name.
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse_name = Some(inverse.into());
        self
    }

    /// Sets the association name.
    #[must_use]
    pub fn with_association(mut self, association: impl Into<String>) -> Self {
        self.association_name = Some(association.into());
        self
    }

    /// Sets the delete policy.
    #[must_use]
    pub fn with_on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }
}

/// Either kind of property, as returned by path lookups.
#[derive(Clone, Debug)]
pub enum Property {
    /// A data property.
    Data(Arc<DataProperty>),
    /// A navigation property.
    Navigation(Arc<NavigationProperty>),
}

impl Property {
    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Data(p) => &p.name,
            Self::Navigation(p) => &p.name,
        }
    }

    /// Returns true if both refer to the same registered property object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Property) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => Arc::ptr_eq(a, b),
            (Self::Navigation(a), Self::Navigation(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns the data property, if this is one.
    #[must_use]
    pub fn as_data(&self) -> Option<&Arc<DataProperty>> {
        match self {
            Self::Data(p) => Some(p),
            Self::Navigation(_) => None,
        }
    }

    /// Returns the navigation property, if this is one.
    #[must_use]
    pub fn as_navigation(&self) -> Option<&Arc<NavigationProperty>> {
        match self {
            Self::Navigation(p) => Some(p),
            Self::Data(_) => None,
        }
    }
}

/// Builds the qualified `Short:#Namespace` form of a type name.
#[must_use]
pub fn qualify_type_name(short_name: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        short_name.to_string()
    } else {
        format!("{short_name}:#{namespace}")
    }
}

/// Schema of an entity type: data and navigation properties plus key rules.
#[derive(Clone, Debug)]
pub struct EntityType {
    short_name: String,
    namespace: String,
    name: Arc<str>,
    /// How keys of new entities are produced.
    pub auto_generated_key_type: AutoGeneratedKeyType,
    /// Default resource (endpoint) name for queries.
    pub default_resource_name: Option<String>,
    /// Type-level validators.
    pub validators: Vec<Validator>,
    data_properties: Vec<Arc<DataProperty>>,
    navigation_properties: Vec<Arc<NavigationProperty>>,
    data_index: HashMap<String, usize>,
    navigation_index: HashMap<String, usize>,
    key_ordinals: Vec<usize>,
}

impl EntityType {
    /// Creates an entity type with no properties.
    #[must_use]
    pub fn new(short_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let short_name = short_name.into();
        let namespace = namespace.into();
        let name: Arc<str> = Arc::from(qualify_type_name(&short_name, &namespace));
        Self {
            short_name,
            namespace,
            name,
            auto_generated_key_type: AutoGeneratedKeyType::None,
            default_resource_name: None,
            validators: Vec::new(),
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
            data_index: HashMap::new(),
            navigation_index: HashMap::new(),
            key_ordinals: Vec::new(),
        }
    }

    /// Adds a data property.
    #[must_use]
    pub fn with_data_property(mut self, property: DataProperty) -> Self {
        self.push_data_property(Arc::new(property));
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn with_navigation_property(mut self, property: NavigationProperty) -> Self {
        self.push_navigation_property(Arc::new(property));
        self
    }

    /// Sets the key generation strategy.
    #[must_use]
    pub fn with_auto_generated_key(mut self, kind: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key_type = kind;
        self
    }

    /// Sets the default resource name.
    #[must_use]
    pub fn with_default_resource_name(mut self, name: impl Into<String>) -> Self {
        self.default_resource_name = Some(name.into());
        self
    }

    /// Adds a type-level validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub(crate) fn push_data_property(&mut self, property: Arc<DataProperty>) {
        let ordinal = self.data_properties.len();
        if property.is_part_of_key {
            self.key_ordinals.push(ordinal);
        }
        self.data_index.insert(property.name.clone(), ordinal);
        self.data_properties.push(property);
    }

    pub(crate) fn push_navigation_property(&mut self, property: Arc<NavigationProperty>) {
        self.navigation_index
            .insert(property.name.clone(), self.navigation_properties.len());
        self.navigation_properties.push(property);
    }

    /// Returns the qualified name (`Short:#Namespace`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Returns the short name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Data properties in ordinal order.
    #[must_use]
    pub fn data_properties(&self) -> &[Arc<DataProperty>] {
        &self.data_properties
    }

    /// Navigation properties in ordinal order.
    #[must_use]
    pub fn navigation_properties(&self) -> &[Arc<NavigationProperty>] {
        &self.navigation_properties
    }

    /// Key properties in key order.
    pub fn key_properties(&self) -> impl Iterator<Item = &Arc<DataProperty>> {
        self.key_ordinals.iter().map(|&i| &self.data_properties[i])
    }

    /// Ordinals of the key properties.
    #[must_use]
    pub fn key_ordinals(&self) -> &[usize] {
        &self.key_ordinals
    }

    /// Concurrency-token properties.
    pub fn concurrency_properties(&self) -> impl Iterator<Item = &Arc<DataProperty>> {
        self.data_properties.iter().filter(|p| p.is_concurrency)
    }

    /// Returns a data property's ordinal.
    #[must_use]
    pub fn data_ordinal(&self, name: &str) -> Option<usize> {
        self.data_index.get(name).copied()
    }

    /// Returns a navigation property's ordinal.
    #[must_use]
    pub fn navigation_ordinal(&self, name: &str) -> Option<usize> {
        self.navigation_index.get(name).copied()
    }

    /// Returns a data property by name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<&Arc<DataProperty>> {
        self.data_ordinal(name).map(|i| &self.data_properties[i])
    }

    /// Returns a navigation property by name.
    #[must_use]
    pub fn navigation_property(&self, name: &str) -> Option<&Arc<NavigationProperty>> {
        self.navigation_ordinal(name)
            .map(|i| &self.navigation_properties[i])
    }

    /// Returns a data property by name, or a `NotFound` error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the property.
    pub fn require_data_property(&self, name: &str) -> Result<(usize, &Arc<DataProperty>)> {
        self.data_ordinal(name)
            .map(|i| (i, &self.data_properties[i]))
            .ok_or_else(|| Error::property_not_found(self.name(), name))
    }

    /// Returns a navigation property by name, or a `NotFound` error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the property.
    pub fn require_navigation_property(
        &self,
        name: &str,
    ) -> Result<(usize, &Arc<NavigationProperty>)> {
        self.navigation_ordinal(name)
            .map(|i| (i, &self.navigation_properties[i]))
            .ok_or_else(|| Error::property_not_found(self.name(), name))
    }

    /// Ordinals of the foreign-key properties of a scalar navigation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if a foreign-key name is not a data property.
    pub fn foreign_key_ordinals(&self, navigation: &NavigationProperty) -> Result<Vec<usize>> {
        navigation
            .foreign_key_names
            .iter()
            .map(|fk| {
                self.data_ordinal(fk).ok_or_else(|| {
                    Error::invalid_metadata(format!(
                        "foreign key '{fk}' of '{}.{}' is not a data property",
                        self.name, navigation.name
                    ))
                })
            })
            .collect()
    }

    /// Builds a key of this type from key values.
    #[must_use]
    pub fn key_from(&self, values: Vec<Value>) -> EntityKey {
        EntityKey::new(self.name_arc(), values)
    }
}

/// Schema of a complex type: a value object embedded in entities.
#[derive(Clone, Debug)]
pub struct ComplexType {
    short_name: String,
    namespace: String,
    name: Arc<str>,
    data_properties: Vec<Arc<DataProperty>>,
    data_index: HashMap<String, usize>,
}

impl ComplexType {
    /// Creates a complex type with no properties.
    #[must_use]
    pub fn new(short_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let short_name = short_name.into();
        let namespace = namespace.into();
        let name: Arc<str> = Arc::from(qualify_type_name(&short_name, &namespace));
        Self {
            short_name,
            namespace,
            name,
            data_properties: Vec::new(),
            data_index: HashMap::new(),
        }
    }

    /// Adds a data property.
    #[must_use]
    pub fn with_data_property(mut self, property: DataProperty) -> Self {
        self.push_data_property(Arc::new(property));
        self
    }

    pub(crate) fn push_data_property(&mut self, property: Arc<DataProperty>) {
        self.data_index
            .insert(property.name.clone(), self.data_properties.len());
        self.data_properties.push(property);
    }

    /// Returns the qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the short name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Data properties in declaration order.
    #[must_use]
    pub fn data_properties(&self) -> &[Arc<DataProperty>] {
        &self.data_properties
    }

    /// Returns a data property by name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<&Arc<DataProperty>> {
        self.data_index.get(name).map(|&i| &self.data_properties[i])
    }
}

/// A registered structural type.
#[derive(Clone, Debug)]
pub enum StructuralType {
    /// An entity type.
    Entity(Arc<EntityType>),
    /// A complex type.
    Complex(Arc<ComplexType>),
}

impl StructuralType {
    /// Returns the qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Entity(t) => t.name(),
            Self::Complex(t) => t.name(),
        }
    }

    /// Returns the short name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        match self {
            Self::Entity(t) => t.short_name(),
            Self::Complex(t) => t.short_name(),
        }
    }

    /// Returns true for complex types.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    /// Data properties of either kind of type.
    #[must_use]
    pub fn data_properties(&self) -> &[Arc<DataProperty>] {
        match self {
            Self::Entity(t) => t.data_properties(),
            Self::Complex(t) => t.data_properties(),
        }
    }

    /// Returns a data property by name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<&Arc<DataProperty>> {
        match self {
            Self::Entity(t) => t.data_property(name),
            Self::Complex(t) => t.data_property(name),
        }
    }
}

/// A remote data service that metadata was obtained from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataService {
    /// Service root name or URL.
    pub service_name: String,
    /// Whether the service publishes its own metadata.
    #[serde(default = "default_true")]
    pub has_server_metadata: bool,
    /// Adapter used to talk to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_name: Option<String>,
}

impl DataService {
    /// Creates a data service description.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            has_server_metadata: true,
            adapter_name: None,
        }
    }

    /// Sets whether the service publishes metadata.
    #[must_use]
    pub fn with_server_metadata(mut self, has_server_metadata: bool) -> Self {
        self.has_server_metadata = has_server_metadata;
        self
    }
}

fn default_true() -> bool {
    true
}
