//! Entity keys: identity of an entity within a cache.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Identity of an entity: its entity type plus the ordered key values.
///
/// Two keys are equal when their type names and every key value are equal.
/// At most one attached entity per cache carries a given key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity_type: Arc<str>,
    values: Arc<[Value]>,
}

impl EntityKey {
    /// Creates a key from a qualified entity type name and key values.
    #[must_use]
    pub fn new(entity_type: impl Into<Arc<str>>, values: impl Into<Vec<Value>>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values: values.into().into(),
        }
    }

    /// Creates a single-valued key.
    #[must_use]
    pub fn single(entity_type: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        Self::new(entity_type, vec![value.into()])
    }

    /// Returns the qualified entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the key values in key-property order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns true if any key value is null.
    ///
    /// Such a key does not identify an entity.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.entity_type)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}
