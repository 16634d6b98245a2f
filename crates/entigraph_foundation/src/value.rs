//! Core value type for entity data properties.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Value of a data property.
///
/// Values are cheaply cloneable. Equality and hashing are structural, with
/// floats compared by bit pattern so that values can take part in keys.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (all integral data types).
    Int(i64),
    /// Floating point value (`Double`, `Single`, `Decimal`).
    Float(f64),
    /// String value.
    String(Arc<str>),
    /// 128-bit globally unique identifier.
    Guid(Uuid),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Instance of a complex type (value object without identity).
    Complex(ComplexValue),
}

impl Value {
    /// Returns true if this value is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The float, if this is one.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Any numeric value widened to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract a GUID.
    #[must_use]
    pub const fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Attempts to extract a timestamp.
    #[must_use]
    pub const fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    /// Attempts to extract a complex value.
    #[must_use]
    pub const fn as_complex(&self) -> Option<&ComplexValue> {
        match self {
            Self::Complex(c) => Some(c),
            _ => None,
        }
    }

    /// Short label of this value's variant, used in diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Guid(_) => "guid",
            Self::DateTime(_) => "datetime",
            Self::Complex(_) => "complex",
        }
    }

    /// Converts this value to its JSON form.
    ///
    /// GUIDs are hyphenated strings, timestamps are RFC 3339 strings, and
    /// complex values are objects keyed by property name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Guid(g) => serde_json::Value::String(g.hyphenated().to_string()),
            Self::DateTime(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::Complex(c) => serde_json::Value::Object(
                c.fields()
                    .map(|(name, value)| (name.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

// Floats compare by bit pattern so `Value` can be a map key.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Complex(a), Self::Complex(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Float(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Guid(g) => g.hash(state),
            Self::DateTime(d) => d.hash(state),
            Self::Complex(c) => c.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Guid(g) => write!(f, "{}", g.hyphenated()),
            Self::DateTime(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Complex(c) => write!(f, "{c}"),
        }
    }
}

/// Instance of a complex type: named property values without identity.
///
/// Complex values compare structurally. Writes copy the field table only
/// when it is shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComplexValue {
    type_name: Arc<str>,
    fields: Arc<BTreeMap<String, Value>>,
}

impl ComplexValue {
    /// Creates an empty complex value of the named complex type.
    #[must_use]
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Arc::new(BTreeMap::new()),
        }
    }

    /// Adds a field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Returns the qualified name of the complex type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        Arc::make_mut(&mut self.fields).insert(name.into(), value.into())
    }

    /// Iterates over the fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for ComplexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}


impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Self::Guid(g)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::DateTime(d)
    }
}

impl From<ComplexValue> for Value {
    fn from(c: ComplexValue) -> Self {
        Self::Complex(c)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}
