//! The portable export bundle and its codecs.
//!
//! A bundle carries optional metadata plus one group of entities per type.
//! Values are JSON-natural and decoded against the target property's type
//! on import. Bundles encode as JSON text or as MessagePack with named
//! fields.

use entigraph_foundation::{EntityState, Error, Result};
use entigraph_storage::MetadataDocument;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// An exported set of entities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Metadata format version of the exporting store.
    pub metadata_version: String,
    /// Name of the exporting metadata store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_store_name: Option<String>,
    /// Embedded metadata, when exported with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataDocument>,
    /// Entities grouped by type, in first-seen order.
    #[serde(default)]
    pub entity_groups: Vec<EntityGroup>,
}

/// Exported entities of one type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityGroup {
    /// Qualified entity type name.
    pub entity_type: String,
    /// The entities.
    pub entities: Vec<ExportedEntity>,
}

/// One exported entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEntity {
    /// Current data values by property name.
    pub values: Map<String, Json>,
    /// Tracking state.
    pub entity_state: EntityState,
    /// Original values of changed properties.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub original_values: Map<String, Json>,
    /// True if the key is temporary.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_temp_key: bool,
}

impl Bundle {
    /// Total number of entities across groups.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_groups.iter().map(|g| g.entities.len()).sum()
    }

    /// Returns true if the bundle carries no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }

    /// Renders the bundle as JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }

    /// Parses a bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the text is not a bundle.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::serialization)
    }

    /// Encodes the bundle as MessagePack.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Error::serialization)
    }

    /// Decodes a bundle from MessagePack.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the bytes are not a bundle.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(Error::serialization)
    }
}
