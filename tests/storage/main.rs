//! Integration tests for Layer 1: Storage
//!
//! Tests for the metadata store, entity instances, relationship fixup,
//! change tracking, and merging into the cache.

#[path = "../support/mod.rs"]
mod support;

mod instances;
mod relationships;
mod tracking;
