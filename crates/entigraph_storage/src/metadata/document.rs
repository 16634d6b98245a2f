//! Serializable metadata document.
//!
//! This is the JSON form consumed by `import_metadata` and produced by
//! `export_metadata`. Field names are camelCase.

use std::collections::BTreeMap;
use std::sync::Arc;

use entigraph_foundation::{DataType, Error, Result};
use serde::{Deserialize, Serialize};

use super::types::{
    AutoGeneratedKeyType, ComplexType, DataProperty, DataService, EntityType, NavigationProperty,
    OnDelete, StructuralType, Validator,
};

/// Version tag written into exported metadata documents.
pub const METADATA_FORMAT_VERSION: &str = "1.0.5";

/// Top-level metadata document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    /// Document format version.
    #[serde(default)]
    pub metadata_version: String,
    /// Name of the metadata store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Data services the metadata belongs to.
    #[serde(default)]
    pub data_services: Vec<DataService>,
    /// Entity and complex types.
    #[serde(default)]
    pub structural_types: Vec<StructuralTypeDocument>,
    /// Resource name to qualified entity type name.
    #[serde(default)]
    pub resource_entity_type_map: BTreeMap<String, String>,
}

impl MetadataDocument {
    /// Parses a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the text is not a valid document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::serialization)
    }

    /// Renders the document as JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }
}

/// One entity or complex type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralTypeDocument {
    /// Unqualified type name.
    pub short_name: String,
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// True for complex types.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_complex_type: bool,
    /// Key generation strategy (entity types only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_generated_key_type: Option<AutoGeneratedKeyType>,
    /// Default resource name (entity types only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource_name: Option<String>,
    /// Data properties.
    #[serde(default)]
    pub data_properties: Vec<DataPropertyDocument>,
    /// Navigation properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation_properties: Vec<NavigationPropertyDocument>,
    /// Type-level validators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
}

/// One data property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPropertyDocument {
    /// Property name.
    pub name: String,
    /// Data type name (absent for complex properties).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Complex type name, for complex properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complex_type_name: Option<String>,
    /// Nullability (defaults to true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
    /// Key membership.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_part_of_key: bool,
    /// Client-only property.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unmapped: bool,
    /// Scalar flag; only `true` is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_scalar: Option<bool>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Maximum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// `Fixed` for concurrency tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_mode: Option<String>,
    /// Validators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
}

/// One navigation property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPropertyDocument {
    /// Property name.
    pub name: String,
    /// Qualified name of the related type.
    pub entity_type_name: String,
    /// True for a single reference.
    #[serde(default = "default_true")]
    pub is_scalar: bool,
    /// Association shared with the inverse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_name: Option<String>,
    /// Foreign-key property names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_key_names: Vec<String>,
    /// Inverse navigation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_name: Option<String>,
    /// Delete policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<OnDelete>,
}

fn default_true() -> bool {
    true
}

impl StructuralTypeDocument {
    /// Builds the structural type this document describes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` for unknown data types, non-scalar data
    /// properties, or default values that do not fit their type.
    pub fn to_structural_type(&self) -> Result<StructuralType> {
        let properties = self
            .data_properties
            .iter()
            .map(|p| p.to_data_property(&self.short_name))
            .collect::<Result<Vec<_>>>()?;

        if self.is_complex_type {
            let mut ty = ComplexType::new(&self.short_name, &self.namespace);
            for p in properties {
                ty = ty.with_data_property(p);
            }
            return Ok(StructuralType::Complex(Arc::new(ty)));
        }

        let mut ty = EntityType::new(&self.short_name, &self.namespace)
            .with_auto_generated_key(self.auto_generated_key_type.unwrap_or_default());
        ty.default_resource_name.clone_from(&self.default_resource_name);
        ty.validators.clone_from(&self.validators);
        for p in properties {
            ty = ty.with_data_property(p);
        }
        for nav in &self.navigation_properties {
            ty = ty.with_navigation_property(nav.to_navigation_property());
        }
        Ok(StructuralType::Entity(Arc::new(ty)))
    }

    /// Describes an entity type.
    #[must_use]
    pub fn from_entity_type(ty: &EntityType) -> Self {
        Self {
            short_name: ty.short_name().to_string(),
            namespace: ty.namespace().to_string(),
            is_complex_type: false,
            auto_generated_key_type: Some(ty.auto_generated_key_type),
            default_resource_name: ty.default_resource_name.clone(),
            data_properties: ty
                .data_properties()
                .iter()
                .map(|p| DataPropertyDocument::from_data_property(p))
                .collect(),
            navigation_properties: ty
                .navigation_properties()
                .iter()
                .map(|p| NavigationPropertyDocument::from_navigation_property(p))
                .collect(),
            validators: ty.validators.clone(),
        }
    }

    /// Describes a complex type.
    #[must_use]
    pub fn from_complex_type(ty: &ComplexType) -> Self {
        Self {
            short_name: ty.short_name().to_string(),
            namespace: ty.namespace().to_string(),
            is_complex_type: true,
            data_properties: ty
                .data_properties()
                .iter()
                .map(|p| DataPropertyDocument::from_data_property(p))
                .collect(),
            ..Self::default()
        }
    }
}

impl DataPropertyDocument {
    fn to_data_property(&self, owner: &str) -> Result<DataProperty> {
        if self.is_scalar == Some(false) {
            return Err(Error::invalid_metadata(format!(
                "non-scalar data property '{owner}.{}' is not supported",
                self.name
            )));
        }
        let mut property = if let Some(complex) = &self.complex_type_name {
            DataProperty::complex(&self.name, complex)
        } else {
            let type_name = self.data_type.as_deref().unwrap_or("Undefined");
            let data_type = DataType::from_name(type_name).ok_or_else(|| {
                Error::invalid_metadata(format!(
                    "unknown data type '{type_name}' on '{owner}.{}'",
                    self.name
                ))
            })?;
            DataProperty::new(&self.name, data_type)
        };
        property.is_part_of_key = self.is_part_of_key;
        property.is_unmapped = self.is_unmapped;
        property.is_nullable = self
            .is_nullable
            .unwrap_or(!self.is_part_of_key && !property.is_complex());
        property.max_length = self.max_length;
        property.is_concurrency = self.concurrency_mode.as_deref() == Some("Fixed");
        property.validators.clone_from(&self.validators);
        if let Some(json) = &self.default_value {
            property.default_value = Some(property.data_type.decode_json(json).map_err(|e| {
                Error::invalid_metadata(format!(
                    "bad default value for '{owner}.{}': {e}",
                    self.name
                ))
            })?);
        }
        Ok(property)
    }

    fn from_data_property(p: &DataProperty) -> Self {
        Self {
            name: p.name.clone(),
            data_type: (!p.is_complex()).then(|| p.data_type.name().to_string()),
            complex_type_name: p.complex_type_name.clone(),
            is_nullable: Some(p.is_nullable),
            is_part_of_key: p.is_part_of_key,
            is_unmapped: p.is_unmapped,
            is_scalar: None,
            default_value: p.default_value.as_ref().map(entigraph_foundation::Value::to_json),
            max_length: p.max_length,
            concurrency_mode: p.is_concurrency.then(|| "Fixed".to_string()),
            validators: p.validators.clone(),
        }
    }
}

impl NavigationPropertyDocument {
    fn to_navigation_property(&self) -> NavigationProperty {
        NavigationProperty {
            name: self.name.clone(),
            entity_type_name: self.entity_type_name.clone(),
            is_scalar: self.is_scalar,
            association_name: self.association_name.clone(),
            foreign_key_names: self.foreign_key_names.clone(),
            inverse_name: self.inverse_name.clone(),
            on_delete: self.on_delete.unwrap_or_default(),
        }
    }

    fn from_navigation_property(p: &NavigationProperty) -> Self {
        Self {
            name: p.name.clone(),
            entity_type_name: p.entity_type_name.clone(),
            is_scalar: p.is_scalar,
            association_name: p.association_name.clone(),
            foreign_key_names: p.foreign_key_names.clone(),
            inverse_name: p.inverse_name.clone(),
            on_delete: (p.on_delete != OnDelete::Detach).then_some(p.on_delete),
        }
    }
}
