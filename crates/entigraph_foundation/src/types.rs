//! Data type descriptors for data properties.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::Value;

/// Declared type of a data property.
///
/// Used to coerce incoming values, decode JSON, and supply defaults for
/// non-nullable properties.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Unicode text.
    String,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Unsigned 8-bit integer.
    Byte,
    /// Boolean.
    Boolean,
    /// Fixed-point decimal (stored as a float).
    Decimal,
    /// 64-bit float.
    Double,
    /// 32-bit float (stored as a 64-bit float).
    Single,
    /// Timestamp.
    DateTime,
    /// GUID.
    Guid,
    /// Untyped; accepts any scalar value.
    Undefined,
}

impl DataType {
    /// All data types, in declaration order.
    pub const ALL: [DataType; 12] = [
        Self::String,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Byte,
        Self::Boolean,
        Self::Decimal,
        Self::Double,
        Self::Single,
        Self::DateTime,
        Self::Guid,
        Self::Undefined,
    ];

    /// Returns the type's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Byte => "Byte",
            Self::Boolean => "Boolean",
            Self::Decimal => "Decimal",
            Self::Double => "Double",
            Self::Single => "Single",
            Self::DateTime => "DateTime",
            Self::Guid => "Guid",
            Self::Undefined => "Undefined",
        }
    }

    /// Parses a type from its name. An `Edm.` prefix is accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("Edm.").unwrap_or(name);
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Returns true for integral types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64 | Self::Byte)
    }

    /// Returns true for integral and floating point types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Decimal | Self::Double | Self::Single)
    }

    /// Default value for a non-nullable property of this type.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::String => Value::String(Arc::from("")),
            Self::Int16 | Self::Int32 | Self::Int64 | Self::Byte => Value::Int(0),
            Self::Decimal | Self::Double | Self::Single => Value::Float(0.0),
            Self::Boolean => Value::Bool(false),
            Self::DateTime => NaiveDate::from_ymd_opt(1900, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map_or(Value::Null, |dt| Value::DateTime(dt.and_utc())),
            Self::Guid => Value::Guid(Uuid::nil()),
            Self::Undefined => Value::Null,
        }
    }

    /// Coerces a value into this type.
    ///
    /// Strings are parsed for numeric, boolean, GUID, and timestamp types.
    /// When `nullable` is set, an empty string written to a non-string
    /// type becomes null.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value cannot represent this type.
    pub fn coerce(self, value: Value, nullable: bool) -> Result<Value> {
        if value.is_null() || self == Self::Undefined {
            return Ok(value);
        }
        if let Value::String(s) = &value {
            if self != Self::String {
                if s.trim().is_empty() && nullable {
                    return Ok(Value::Null);
                }
                return self.parse(s);
            }
        }
        match (self, value) {
            (Self::String, v @ Value::String(_)) => Ok(v),
            (Self::Boolean, v @ Value::Bool(_)) => Ok(v),
            (Self::Guid, v @ Value::Guid(_)) => Ok(v),
            (Self::DateTime, v @ Value::DateTime(_)) => Ok(v),
            (t, Value::Int(n)) if t.is_integer() => t.check_range(n),
            #[allow(clippy::cast_possible_truncation)]
            (t, Value::Float(n)) if t.is_integer() && n.fract() == 0.0 => t.check_range(n as i64),
            #[allow(clippy::cast_precision_loss)]
            (Self::Decimal | Self::Double | Self::Single, Value::Int(n)) => {
                Ok(Value::Float(n as f64))
            }
            (Self::Decimal | Self::Double | Self::Single, v @ Value::Float(_)) => Ok(v),
            (t, v) => Err(Error::type_mismatch(t, format!("{} {v}", v.kind_name()))),
        }
    }

    /// Decodes a JSON value into this type.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the JSON value cannot represent this type.
    pub fn decode_json(self, json: &serde_json::Value) -> Result<Value> {
        let raw = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s.as_str()),
            other => return Err(Error::type_mismatch(self, other.to_string())),
        };
        self.coerce(raw, true)
    }

    fn check_range(self, n: i64) -> Result<Value> {
        let (min, max) = match self {
            Self::Byte => (0, i64::from(u8::MAX)),
            Self::Int16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            Self::Int32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
            _ => (i64::MIN, i64::MAX),
        };
        if (min..=max).contains(&n) {
            Ok(Value::Int(n))
        } else {
            Err(Error::type_mismatch(self, format!("out of range integer {n}")))
        }
    }

    fn parse(self, s: &str) -> Result<Value> {
        let mismatch = || Error::type_mismatch(self, format!("string {s:?}"));
        let trimmed = s.trim();
        match self {
            t if t.is_integer() => {
                let n = trimmed.parse::<i64>().map_err(|_| mismatch())?;
                t.check_range(n)
            }
            Self::Decimal | Self::Double | Self::Single => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch()),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            Self::Guid => Uuid::parse_str(trimmed)
                .map(Value::Guid)
                .map_err(|_| mismatch()),
            Self::DateTime => DateTime::parse_from_rfc3339(trimmed)
                .map(|d| Value::DateTime(d.with_timezone(&Utc)))
                .map_err(|_| mismatch()),
            _ => Ok(Value::from(s)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
