//! Error types for the Entigraph system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::entity::EntityId;
use crate::state::EntityState;
use crate::types::DataType;

/// Result type alias for Entigraph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Entigraph operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates an error for an unknown entity or complex type name.
    #[must_use]
    pub fn type_not_found(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound {
            what: "type",
            name: name.into(),
            owner: None,
        })
    }

    /// Creates an error for an unknown property on a structural type.
    #[must_use]
    pub fn property_not_found(type_name: &str, property: &str) -> Self {
        Self::new(ErrorKind::NotFound {
            what: "property",
            name: property.to_string(),
            owner: Some(type_name.to_string()),
        })
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(id: EntityId) -> Self {
        Self::new(ErrorKind::NotFound {
            what: "entity",
            name: id.to_string(),
            owner: None,
        })
    }

    /// Creates a stale entity reference error.
    #[must_use]
    pub fn stale_entity(id: EntityId) -> Self {
        Self::new(ErrorKind::StaleEntity(id))
    }

    /// Creates an error for an operation that is illegal in the entity's current state.
    #[must_use]
    pub fn state_conflict(operation: &'static str, state: EntityState) -> Self {
        Self::new(ErrorKind::StateConflict { operation, state })
    }

    /// Creates an error for a second entity claiming an already-attached key.
    #[must_use]
    pub fn duplicate_key(key: impl fmt::Display) -> Self {
        Self::new(ErrorKind::IntegrityViolation(format!(
            "an entity with the key {key} is already attached to this cache"
        )))
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: DataType, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected,
            actual: actual.into(),
        })
    }

    /// Creates an invalid metadata error.
    #[must_use]
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMetadata(message.into()))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Serialization(message.to_string()))
    }

    /// Returns true if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound { .. })
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A type, property, or entity could not be located.
    #[error("unable to locate a {what} by the name: '{name}'{}", on_type(.owner.as_deref()))]
    NotFound {
        /// What kind of thing was looked up (`type`, `property`, `entity`).
        what: &'static str,
        /// The name or token that failed to resolve.
        name: String,
        /// The type searched, for properties.
        owner: Option<String>,
    },

    /// The operation is not legal for the entity's current state.
    #[error("cannot {operation} an entity whose state is {state}")]
    StateConflict {
        /// The attempted operation.
        operation: &'static str,
        /// The state the entity was in.
        state: EntityState,
    },

    /// An import was refused by the metadata version hook.
    #[error("metadata version mismatch: {0}")]
    VersionMismatch(String),

    /// A key uniqueness rule was broken.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A value does not fit the declared property type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The declared data type.
        expected: DataType,
        /// Description of the value that was supplied.
        actual: String,
    },

    /// Metadata is malformed or inconsistent.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Entity handle is stale (its slot was released).
    #[error("stale entity reference: {0:?}")]
    StaleEntity(EntityId),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn on_type(owner: Option<&str>) -> String {
    owner.map(|t| format!(" on type '{t}'")).unwrap_or_default()
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The public operation that failed.
    pub operation: Option<String>,
    /// The entity type involved, if any.
    pub entity_type: Option<String>,
    /// Display form of the entity key involved, if any.
    pub key: Option<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failing operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Sets the entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the entity key.
    #[must_use]
    pub fn with_key(mut self, key: impl fmt::Display) -> Self {
        self.key = Some(key.to_string());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(operation) = &self.operation {
            write!(f, "in {operation}")?;
        }
        if let Some(entity_type) = &self.entity_type {
            write!(f, " on {entity_type}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " ({key})")?;
        }
        Ok(())
    }
}
