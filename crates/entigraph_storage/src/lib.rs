//! Metadata, entity instances, and the tracked entity cache for Entigraph.
//!
//! This crate provides:
//! - [`MetadataStore`] - Shared registry of entity and complex types
//! - [`Entity`] - Entity instances with a change-tracking aspect
//! - [`Cache`] - Identity map with relationship fixup and atomic operations
//! - [`KeyGenerator`] - Temporary keys for new entities
//! - [`EventChannel`] - Property and collection change notifications

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod arena;
pub mod cache;
pub mod config;
pub mod events;
pub mod instance;
pub mod key_generator;
pub mod metadata;

pub use arena::Arena;
pub use cache::{Cache, IncomingEntity, MergeOutcome, SaveResult, SavedEntity, TypeFilter};
pub use config::{CacheConfig, CreateOptions, MergeStrategy};
pub use events::{
    ArrayChangedEvent, EventChannel, PropertyChangedEvent, PropertyValue, SubscriptionToken,
};
pub use instance::{Entity, EntityAspect, InitialValues, RelationArray};
pub use key_generator::{KeyGenerator, TEMP_STRING_PREFIX};
pub use metadata::{
    AutoGeneratedKeyType, ComplexType, DataProperty, DataService, EntityCtor, EntityHooks,
    EntityInitializer, EntityType, METADATA_FORMAT_VERSION, MetadataCheckpoint, MetadataDocument,
    MetadataStore, NavigationProperty, OnDelete, Property, SerializerFn, StructuralType, Validator,
};
