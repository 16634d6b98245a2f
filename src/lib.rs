//! Entigraph - In-memory entity graph cache with change tracking
//!
//! This crate re-exports all layers of the Entigraph system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: entigraph_transfer  : Export bundles, import/merge protocol
//! Layer 1: entigraph_storage   : Metadata, key generation, fixup, tracked cache
//! Layer 0: entigraph_foundation: Core types (Value, EntityKey, EntityState, Error)
//! ```

pub use entigraph_foundation as foundation;
pub use entigraph_storage as storage;
pub use entigraph_transfer as transfer;
