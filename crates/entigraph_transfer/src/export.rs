//! Exporting cache contents to a bundle.

use entigraph_foundation::{EntityId, Error, Result};
use entigraph_storage::{Cache, METADATA_FORMAT_VERSION, TypeFilter};
use serde_json::Map;
use tracing::debug;

use crate::bundle::{Bundle, EntityGroup, ExportedEntity};

/// Which entities to export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ExportSelection {
    /// Every attached entity.
    #[default]
    All,
    /// Exactly these entities. An empty list exports nothing.
    Entities(Vec<EntityId>),
    /// Every attached entity of these types (short or qualified names).
    Types(Vec<String>),
}

impl From<Vec<EntityId>> for ExportSelection {
    fn from(ids: Vec<EntityId>) -> Self {
        Self::Entities(ids)
    }
}

impl From<&[EntityId]> for ExportSelection {
    fn from(ids: &[EntityId]) -> Self {
        Self::Entities(ids.to_vec())
    }
}

/// Export settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    /// Embed the metadata document in the bundle.
    pub include_metadata: bool,
    /// Render the bundle as JSON text instead of returning it.
    pub as_string: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            as_string: true,
        }
    }
}

impl ExportOptions {
    /// Sets whether metadata is embedded.
    #[must_use]
    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    /// Sets whether the bundle is rendered as text.
    #[must_use]
    pub fn with_string(mut self, as_string: bool) -> Self {
        self.as_string = as_string;
        self
    }
}

/// Export output, in the form requested by [`ExportOptions::as_string`].
#[derive(Clone, Debug, PartialEq)]
pub enum Exported {
    /// JSON text.
    Json(String),
    /// The structured bundle.
    Bundle(Bundle),
}

impl Exported {
    /// Returns the structured bundle, parsing it if it was rendered.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if rendered text cannot be parsed.
    pub fn into_bundle(self) -> Result<Bundle> {
        match self {
            Self::Json(json) => Bundle::from_json(&json),
            Self::Bundle(bundle) => Ok(bundle),
        }
    }

    /// Returns the JSON text, rendering the bundle if needed.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if rendering fails.
    pub fn into_json(self) -> Result<String> {
        match self {
            Self::Json(json) => Ok(json),
            Self::Bundle(bundle) => bundle.to_json(),
        }
    }
}

/// Exports entities from a cache.
///
/// Entities are grouped by type in order of first appearance. Each entity
/// carries its data values, original values, state and temporary-key flag.
/// The store's serializer filter, when installed, may rewrite or drop
/// individual values.
///
/// # Errors
///
/// Returns `NotFound` for an unknown type name or entity, `StaleEntity` for
/// a released handle, or `StateConflict` if a listed entity is detached.
pub fn export_entities(
    cache: &Cache,
    selection: ExportSelection,
    options: &ExportOptions,
) -> Result<Exported> {
    let ids = match selection {
        ExportSelection::All => cache.get_entities(TypeFilter::All, &[])?,
        ExportSelection::Types(names) => cache.get_entities(names, &[])?,
        ExportSelection::Entities(ids) => ids,
    };

    let metadata = cache.metadata();
    let serializer = metadata.serializer();
    let mut groups: Vec<EntityGroup> = Vec::new();
    for id in ids {
        let entity = cache.entity(id)?;
        let aspect = entity.entity_aspect();
        if aspect.state().is_detached() {
            return Err(Error::state_conflict("export", aspect.state()));
        }
        let et = entity.entity_type()?;

        let mut values = Map::new();
        for property in et.data_properties() {
            let value = entity.get(&property.name)?;
            let value = match &serializer {
                Some(filter) => match filter(property, &value) {
                    Some(value) => value,
                    None => continue,
                },
                None => value,
            };
            values.insert(property.name.clone(), value.to_json());
        }
        let original_values = aspect
            .original_values()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();

        let exported = ExportedEntity {
            values,
            entity_state: aspect.state(),
            original_values,
            has_temp_key: aspect.has_temp_key(),
        };
        match groups.iter_mut().find(|g| g.entity_type == et.name()) {
            Some(group) => group.entities.push(exported),
            None => groups.push(EntityGroup {
                entity_type: et.name().to_string(),
                entities: vec![exported],
            }),
        }
    }

    let bundle = Bundle {
        metadata_version: METADATA_FORMAT_VERSION.to_string(),
        metadata_store_name: metadata.name(),
        metadata: options
            .include_metadata
            .then(|| metadata.export_metadata_document()),
        entity_groups: groups,
    };
    debug!(
        entities = bundle.entity_count(),
        groups = bundle.entity_groups.len(),
        "exported entities"
    );

    if options.as_string {
        bundle.to_json().map(Exported::Json)
    } else {
        Ok(Exported::Bundle(bundle))
    }
}
