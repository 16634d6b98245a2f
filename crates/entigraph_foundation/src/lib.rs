//! Core values, keys, entity states, and errors for Entigraph.
//!
//! This crate provides:
//! - [`Value`] - Data property values (scalars and complex values)
//! - [`DataType`] - Declared property types with coercion and defaults
//! - [`EntityKey`] - Entity identity (type plus ordered key values)
//! - [`EntityState`] - Change-tracking states
//! - [`EntityId`] - Generational handles into a cache arena
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entity;
pub mod error;
pub mod key;
pub mod state;
pub mod types;
pub mod value;

pub use entity::EntityId;
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use key::EntityKey;
pub use state::EntityState;
pub use types::DataType;
pub use value::{ComplexValue, Value};
