//! Temporary key generation.
//!
//! New entities of types with generated keys receive a temporary key until
//! a save assigns the permanent one. Temporary values are recognizable on
//! sight: negative numbers, strings with a reserved prefix, and GUIDs of
//! the custom (version 8) variant.

use entigraph_foundation::{DataType, EntityKey, Error, Result, Value};
use uuid::{Uuid, Version};

use crate::metadata::EntityType;

/// Prefix of generated temporary string keys.
pub const TEMP_STRING_PREFIX: &str = "~tmp-";

/// Generates temporary keys and remembers which keys are temporary.
#[derive(Clone, Debug)]
pub struct KeyGenerator {
    next_number: i64,
    temp_keys: im::HashSet<EntityKey>,
    permanent: im::HashMap<EntityKey, EntityKey>,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    /// Creates a generator whose first numeric key is `-1`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// Creates a generator whose first numeric key is `-seed`.
    #[must_use]
    pub fn with_seed(seed: i64) -> Self {
        Self {
            next_number: seed.max(1),
            temp_keys: im::HashSet::new(),
            permanent: im::HashMap::new(),
        }
    }

    /// Produces a fresh temporary key value for an entity type and
    /// registers the resulting key as temporary.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the type does not have exactly one key
    /// property, or its key type cannot hold temporary values.
    pub fn generate_temp_key_value(&mut self, entity_type: &EntityType) -> Result<Value> {
        let mut keys = entity_type.key_properties();
        let (Some(key), None) = (keys.next(), keys.next()) else {
            return Err(Error::invalid_metadata(format!(
                "cannot generate a temporary key for '{}': it needs exactly one key property",
                entity_type.name()
            )));
        };
        let value = match key.data_type {
            t if t.is_integer() => Value::Int(-self.bump()),
            #[allow(clippy::cast_precision_loss)]
            DataType::Decimal | DataType::Double | DataType::Single => {
                Value::Float(-(self.bump() as f64))
            }
            DataType::String => Value::from(format!("{TEMP_STRING_PREFIX}{}", self.bump())),
            DataType::Guid => Value::Guid(Uuid::new_v8(Uuid::new_v4().into_bytes())),
            other => {
                return Err(Error::invalid_metadata(format!(
                    "cannot generate a temporary key of type {other} for '{}'",
                    entity_type.name()
                )));
            }
        };
        self.temp_keys
            .insert(entity_type.key_from(vec![value.clone()]));
        Ok(value)
    }

    fn bump(&mut self) -> i64 {
        let n = self.next_number;
        self.next_number += 1;
        n
    }

    /// Returns true if a single value looks like a generated temporary value.
    #[must_use]
    pub fn is_temp_value(value: &Value) -> bool {
        match value {
            Value::Int(n) => *n < 0,
            Value::Float(n) => *n < 0.0,
            Value::String(s) => s.starts_with(TEMP_STRING_PREFIX),
            Value::Guid(g) => g.get_version() == Some(Version::Custom),
            _ => false,
        }
    }

    /// Returns true if a key is temporary.
    #[must_use]
    pub fn is_temp_key(&self, key: &EntityKey) -> bool {
        self.temp_keys.contains(key)
            || matches!(key.values(), [value] if Self::is_temp_value(value))
    }

    /// Temporary keys generated by, or registered with, this generator.
    #[must_use]
    pub fn temp_keys(&self) -> Vec<EntityKey> {
        self.temp_keys.iter().cloned().collect()
    }

    pub(crate) fn register_temp_key(&mut self, key: EntityKey) {
        self.temp_keys.insert(key);
    }

    pub(crate) fn forget_temp_key(&mut self, key: &EntityKey) {
        self.temp_keys.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.temp_keys = im::HashSet::new();
    }

    /// Records the permanent key that replaced a temporary key.
    pub fn record_permanent_key(&mut self, temp: EntityKey, permanent: EntityKey) {
        self.temp_keys.remove(&temp);
        self.permanent.insert(temp, permanent);
    }

    /// Returns the permanent key recorded for a temporary key.
    #[must_use]
    pub fn permanent_key_for(&self, temp: &EntityKey) -> Option<EntityKey> {
        self.permanent.get(temp).cloned()
    }
}
