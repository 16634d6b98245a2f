//! Export bundles and the import/merge protocol for Entigraph caches.
//!
//! This crate provides:
//! - [`Bundle`] - Portable set of exported entities, with JSON and MessagePack codecs
//! - [`export_entities`] - Exports a whole cache, some types, or some entities
//! - [`import_entities`] - Merges a bundle into a cache as one atomic operation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod export;
pub mod import;

#[cfg(test)]
mod test_fixture;

pub use bundle::{Bundle, EntityGroup, ExportedEntity};
pub use export::{ExportOptions, ExportSelection, Exported, export_entities};
pub use import::{
    ImportOptions, ImportResult, MetadataVersionFn, MetadataVersionInfo, import_entities,
    import_entities_from_str,
};
