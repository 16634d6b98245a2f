//! Integration tests for Value and DataType
//!
//! Tests coercion, defaults, JSON forms, and complex values.

use chrono::{TimeZone, Utc};
use entigraph_foundation::{ComplexValue, DataType, ErrorKind, Value};
use serde_json::json;
use uuid::Uuid;

// =============================================================================
// Coercion
// =============================================================================

#[test]
fn strings_parse_into_declared_types() {
    assert_eq!(
        DataType::Int32.coerce(Value::from(" 42 "), true).unwrap(),
        Value::Int(42)
    );
    assert_eq!(
        DataType::Boolean.coerce(Value::from("TRUE"), true).unwrap(),
        Value::Bool(true)
    );
    let guid = Uuid::from_u128(99);
    assert_eq!(
        DataType::Guid
            .coerce(Value::from(guid.hyphenated().to_string()), true)
            .unwrap(),
        Value::Guid(guid)
    );
}

#[test]
fn empty_string_is_null_only_when_nullable() {
    assert_eq!(
        DataType::Int32.coerce(Value::from(""), true).unwrap(),
        Value::Null
    );
    assert!(DataType::Int32.coerce(Value::from(""), false).is_err());
    assert_eq!(
        DataType::String.coerce(Value::from(""), true).unwrap(),
        Value::from("")
    );
}

#[test]
fn null_is_accepted_by_every_type() {
    for ty in DataType::ALL {
        assert_eq!(ty.coerce(Value::Null, false).unwrap(), Value::Null);
    }
}

#[test]
fn integer_ranges_are_enforced() {
    assert!(DataType::Byte.coerce(Value::Int(256), true).is_err());
    assert!(DataType::Int16.coerce(Value::Int(-32_769), true).is_err());
    assert_eq!(
        DataType::Int16.coerce(Value::Float(12.0), true).unwrap(),
        Value::Int(12)
    );
    let err = DataType::Int32.coerce(Value::Float(1.5), true).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::TypeMismatch {
            expected: DataType::Int32,
            ..
        }
    ));
}

#[test]
fn decimals_widen_integers() {
    assert_eq!(
        DataType::Decimal.coerce(Value::Int(3), true).unwrap(),
        Value::Float(3.0)
    );
}

#[test]
fn undefined_accepts_anything() {
    let value = Value::from("anything");
    assert_eq!(
        DataType::Undefined.coerce(value.clone(), false).unwrap(),
        value
    );
}

// =============================================================================
// Defaults and names
// =============================================================================

#[test]
fn type_names_accept_edm_prefix() {
    assert_eq!(DataType::from_name("Edm.Int32"), Some(DataType::Int32));
    assert_eq!(DataType::from_name("Guid"), Some(DataType::Guid));
    assert_eq!(DataType::from_name("Bogus"), None);
}

#[test]
fn non_nullable_defaults() {
    assert_eq!(DataType::String.default_value(), Value::from(""));
    assert_eq!(DataType::Int64.default_value(), Value::Int(0));
    assert_eq!(DataType::Guid.default_value(), Value::Guid(Uuid::nil()));
    let expected = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(DataType::DateTime.default_value(), Value::DateTime(expected));
}

// =============================================================================
// JSON
// =============================================================================

#[test]
fn json_round_trip_through_declared_types() {
    let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    let guid = Uuid::from_u128(7);
    let cases = [
        (DataType::DateTime, Value::DateTime(when)),
        (DataType::Guid, Value::Guid(guid)),
        (DataType::Decimal, Value::Float(12.25)),
        (DataType::Int16, Value::Int(-5)),
        (DataType::Boolean, Value::Bool(false)),
        (DataType::String, Value::Null),
    ];
    for (ty, value) in cases {
        assert_eq!(ty.decode_json(&value.to_json()).unwrap(), value, "{ty}");
    }
}

#[test]
fn datetimes_render_rfc3339_with_millis() {
    let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    assert_eq!(
        Value::DateTime(when).to_json(),
        json!("2024-03-01T12:30:00.000Z")
    );
}

#[test]
fn arrays_do_not_decode() {
    assert!(DataType::String.decode_json(&json!([1, 2])).is_err());
}

// =============================================================================
// Complex values
// =============================================================================

#[test]
fn complex_values_compare_structurally() {
    let a = ComplexValue::new("Location:#Northwind").with_field("city", "Oslo");
    let b = ComplexValue::new("Location:#Northwind").with_field("city", "Oslo");
    assert_eq!(Value::from(a.clone()), Value::from(b));

    let mut c = a.clone();
    c.set("city", "Bergen");
    assert_ne!(a, c);
    assert_eq!(a.get("city"), Some(&Value::from("Oslo")));
}

#[test]
fn complex_json_is_an_object() {
    let location = ComplexValue::new("Location:#Northwind")
        .with_field("city", "Oslo")
        .with_field("postalCode", Value::Null);
    assert_eq!(
        Value::from(location).to_json(),
        json!({ "city": "Oslo", "postalCode": null })
    );
}
