//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use entigraph_foundation::{DataType, EntityId, EntityState, Error, ErrorContext, ErrorKind};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn not_found_quotes_the_token() {
    let err = Error::type_not_found("Bogus");
    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "unable to locate a type by the name: 'Bogus'"
    );
}

#[test]
fn property_not_found_names_type_and_property() {
    let err = Error::property_not_found("Order:#Northwind", "shipVia");
    let msg = err.to_string();
    assert!(msg.contains("'shipVia'"));
    assert!(msg.contains("Order:#Northwind"));
}

#[test]
fn state_conflict_names_operation_and_state() {
    let err = Error::state_conflict("delete", EntityState::Detached);
    assert!(matches!(
        err.kind,
        ErrorKind::StateConflict {
            operation: "delete",
            state: EntityState::Detached
        }
    ));
    assert!(err.to_string().contains("Detached"));
}

#[test]
fn duplicate_key_is_an_integrity_violation() {
    let err = Error::duplicate_key("Order:#Northwind(1)");
    assert!(matches!(err.kind, ErrorKind::IntegrityViolation(_)));
    assert!(err.to_string().contains("Order:#Northwind(1)"));
}

#[test]
fn type_mismatch_names_the_type() {
    let err = Error::type_mismatch(DataType::Int16, "string \"abc\"");
    assert!(err.to_string().contains("Int16"));
}

#[test]
fn stale_and_version_errors() {
    let stale = Error::stale_entity(EntityId::new(3, 2));
    assert!(matches!(stale.kind, ErrorKind::StaleEntity(_)));
    let version = Error::new(ErrorKind::VersionMismatch("1.0.5".into()));
    assert!(version.to_string().contains("1.0.5"));
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn context_is_attached_not_rendered() {
    let err = Error::type_not_found("Bogus").with_context(
        ErrorContext::new()
            .with_operation("import")
            .with_entity_type("Order")
            .with_key("Order(1)"),
    );
    let context = err.context.as_ref().unwrap();
    assert_eq!(context.to_string(), "in import on Order (Order(1))");
    assert!(!err.to_string().contains("import"));
}
