//! Integration tests for entity instances and type hooks

use entigraph_foundation::{EntityState, ErrorKind, Value};
use entigraph_storage::{CreateOptions, InitialValues, KeyGenerator};

use crate::support::{cache, guid, northwind};

// =============================================================================
// Detached instances
// =============================================================================

#[test]
fn new_instances_carry_defaults() {
    let store = northwind();
    let detail = store.create_entity("OrderDetail").unwrap();
    assert_eq!(detail.state(), EntityState::Detached);
    assert_eq!(detail.get("quantity").unwrap(), Value::Int(1));
    assert_eq!(detail.get("unitPrice").unwrap(), Value::Null);

    let product = store.create_entity("Product").unwrap();
    assert_eq!(product.get("discontinued").unwrap(), Value::Bool(false));
}

#[test]
fn complex_properties_start_populated() {
    let store = northwind();
    let customer = store.create_entity("Customer").unwrap();
    let Value::Complex(address) = customer.get("address").unwrap() else {
        panic!("address should be a complex value");
    };
    assert_eq!(address.type_name(), "Location:#Northwind");
    assert_eq!(address.get("city"), Some(&Value::Null));
}

#[test]
fn detached_writes_are_coerced_and_untracked() {
    let store = northwind();
    let mut customer = store.create_entity("Customer").unwrap();
    customer.set("companyName", "Acme").unwrap();
    customer.set("rowVersion", "7").unwrap();
    assert_eq!(customer.get("rowVersion").unwrap(), Value::Int(7));
    assert!(customer.entity_aspect().original_values().is_empty());

    let err = customer.set("rowVersion", "seven").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    let err = customer.set("faxNumber", "555").unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// Hooks
// =============================================================================

#[test]
fn constructor_runs_for_every_instance() {
    let store = northwind();
    let supplier = store.create_entity("Supplier").unwrap();
    assert_eq!(supplier.get("companyName").unwrap(), Value::from("New supplier"));

    let mut cache = cache();
    let id = cache.create_entity("Supplier", InitialValues::new()).unwrap();
    assert_eq!(
        cache.get_value(id, "companyName").unwrap(),
        Value::from("New supplier")
    );
}

#[test]
fn initial_values_override_the_constructor() {
    let mut cache = cache();
    let id = cache
        .create_entity(
            "Supplier",
            InitialValues::new().with("companyName", "Exotic Liquids"),
        )
        .unwrap();
    assert_eq!(
        cache.get_value(id, "companyName").unwrap(),
        Value::from("Exotic Liquids")
    );
}

#[test]
fn initializer_sees_initial_values() {
    let mut cache = cache();
    let unnamed = cache.create_entity("Product", InitialValues::new()).unwrap();
    let chai = cache
        .create_entity("Product", InitialValues::new().with("productName", "Chai"))
        .unwrap();
    assert_eq!(cache.get_value(unnamed, "productName").unwrap(), Value::from("Unnamed"));
    assert_eq!(cache.get_value(chai, "productName").unwrap(), Value::from("Chai"));

    // The initializer's write happens before attachment and is not a change.
    assert!(cache.entity(unnamed).unwrap().entity_aspect().original_values().is_empty());
    assert_eq!(cache.state(unnamed).unwrap(), EntityState::Added);
}

// =============================================================================
// Attaching
// =============================================================================

#[test]
fn adding_an_instance_assigns_a_temporary_key() {
    let store = northwind();
    let mut cache = entigraph_storage::Cache::new(store.clone());
    let mut customer = store.create_entity("Customer").unwrap();
    customer.set("companyName", "Acme").unwrap();

    let id = cache.add_entity(customer).unwrap();
    let key = cache.entity_key(id).unwrap();
    assert!(cache.key_generator().is_temp_key(&key));
    assert!(KeyGenerator::is_temp_value(&key.values()[0]));
    assert!(cache.entity(id).unwrap().entity_aspect().has_temp_key());
    assert_eq!(cache.find_entity_by_key(&key), Some(id));
}

#[test]
fn attaching_with_a_key_keeps_it() {
    let store = northwind();
    let mut cache = entigraph_storage::Cache::new(store.clone());
    let mut customer = store.create_entity("Customer").unwrap();
    customer.set("customerID", guid(1)).unwrap();

    let id = cache.attach_entity(customer, EntityState::Unchanged).unwrap();
    assert_eq!(
        cache.get_value(id, "customerID").unwrap(),
        Value::Guid(guid(1))
    );
    assert!(!cache.entity(id).unwrap().entity_aspect().has_temp_key());
}

#[test]
fn entities_without_generated_keys_need_a_key() {
    let mut cache = cache();
    // Zero is a usable key for a type that does not generate keys.
    let id = cache
        .create_entity("OrderDetail", InitialValues::new().with("productID", 10))
        .unwrap();
    assert_eq!(cache.entity_key(id).unwrap().to_string(), "OrderDetail:#Northwind(0,10)");

    let err = cache
        .create_entity("OrderDetail", InitialValues::new().with("productID", 10))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IntegrityViolation(_)));
    assert_eq!(cache.len(), 1);
}

#[test]
fn detached_creation_leaves_the_cache_unchanged() {
    let mut cache = cache();
    let id = cache
        .create_entity_with(
            "Employee",
            InitialValues::new().with("lastName", "Davolio"),
            CreateOptions::with_state(EntityState::Detached),
        )
        .unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.state(id).unwrap(), EntityState::Detached);

    cache.attach(id, EntityState::Added).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_value(id, "employeeID").unwrap(), Value::Int(-1));
}
