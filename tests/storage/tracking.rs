//! Integration tests for change tracking
//!
//! Tests state transitions, original values, accepting and rejecting
//! changes, change queries, notifications, and atomicity.

use std::sync::{Arc, Mutex};

use entigraph_foundation::{EntityState, Error, Value};
use entigraph_storage::{InitialValues, PropertyValue};

use crate::support::{cache, customer, order};

// =============================================================================
// States and original values
// =============================================================================

#[test]
fn first_edit_records_the_original_value() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");

    cache.set_value(c, "companyName", "Alfreds Futterkiste").unwrap();
    cache.set_value(c, "companyName", "Alfreds GmbH").unwrap();
    let aspect = cache.entity(c).unwrap().entity_aspect();
    assert_eq!(aspect.state(), EntityState::Modified);
    assert_eq!(aspect.original_values().len(), 1);
    assert_eq!(
        aspect.original_values()["companyName"],
        Value::from("Alfreds")
    );
}

#[test]
fn writing_the_same_value_is_not_a_change() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    cache.set_value(c, "companyName", "Alfreds").unwrap();
    assert_eq!(cache.state(c).unwrap(), EntityState::Unchanged);
}

#[test]
fn unmapped_properties_are_not_tracked() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    cache.set_value(c, "miscData", "notes").unwrap();
    assert_eq!(cache.state(c).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.get_value(c, "miscData").unwrap(), Value::from("notes"));
}

#[test]
fn complex_field_edits_track_the_whole_value() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let before = cache.get_value(c, "address").unwrap();

    cache.set_value(c, "address.city", "Berlin").unwrap();
    assert_eq!(cache.get_value(c, "address.city").unwrap(), Value::from("Berlin"));
    assert_eq!(cache.state(c).unwrap(), EntityState::Modified);
    assert_eq!(
        cache.entity(c).unwrap().entity_aspect().original_values()["address"],
        before
    );
}

#[test]
fn edits_through_navigations_land_on_the_related_entity() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));

    cache.set_value(o, "customer.contactName", "Maria Anders").unwrap();
    assert_eq!(cache.state(o).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.state(c).unwrap(), EntityState::Modified);
    assert_eq!(
        cache.get_value(c, "contactName").unwrap(),
        Value::from("Maria Anders")
    );
}

#[test]
fn added_entities_have_no_original_values() {
    let mut cache = cache();
    let c = cache
        .create_entity("Customer", InitialValues::new().with("companyName", "Acme"))
        .unwrap();
    cache.set_value(c, "companyName", "Acme Corp").unwrap();
    let aspect = cache.entity(c).unwrap().entity_aspect();
    assert_eq!(aspect.state(), EntityState::Added);
    assert!(aspect.original_values().is_empty());
}

// =============================================================================
// Accept and reject
// =============================================================================

#[test]
fn reject_restores_every_edited_property() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    cache.set_value(c, "companyName", "Changed").unwrap();
    cache.set_value(c, "rowVersion", 3).unwrap();
    cache.set_value(c, "address.city", "Berlin").unwrap();

    assert_eq!(cache.reject_changes().unwrap(), vec![c]);
    assert_eq!(cache.state(c).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.get_value(c, "companyName").unwrap(), Value::from("Alfreds"));
    assert_eq!(cache.get_value(c, "rowVersion").unwrap(), Value::Null);
    assert_eq!(cache.get_value(c, "address.city").unwrap(), Value::Null);
}

#[test]
fn reject_detaches_added_entities() {
    let mut cache = cache();
    let c = cache.create_entity("Customer", InitialValues::new()).unwrap();
    assert!(cache.reject_entity_changes(c).unwrap());
    assert_eq!(cache.state(c).unwrap(), EntityState::Detached);
    assert!(cache.is_empty());
}

#[test]
fn accept_makes_changes_permanent() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let added = cache.create_entity("Customer", InitialValues::new()).unwrap();
    cache.set_value(c, "companyName", "Changed").unwrap();

    let accepted = cache.accept_changes().unwrap();
    assert_eq!(accepted, vec![c, added]);
    assert!(!cache.has_changes(entigraph_storage::TypeFilter::All).unwrap());
    assert!(cache.entity(c).unwrap().entity_aspect().original_values().is_empty());
    assert!(!cache.entity(added).unwrap().entity_aspect().has_temp_key());
    assert!(!cache.reject_entity_changes(c).unwrap());
}

#[test]
fn set_modified_only_moves_unchanged_entities() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let added = cache.create_entity("Customer", InitialValues::new()).unwrap();
    cache.set_modified(c).unwrap();
    cache.set_modified(added).unwrap();
    assert_eq!(cache.state(c).unwrap(), EntityState::Modified);
    assert_eq!(cache.state(added).unwrap(), EntityState::Added);
}

// =============================================================================
// Change queries
// =============================================================================

#[test]
fn changes_filter_by_type_and_state() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o1 = order(&mut cache, 10248, Some(1));
    let o2 = order(&mut cache, 10249, Some(1));
    cache.set_value(o2, "freight", 11.61).unwrap();
    let o3 = cache.create_entity("Order", InitialValues::new()).unwrap();

    assert_eq!(cache.get_changes("Order").unwrap(), vec![o2, o3]);
    assert!(cache.get_changes("Customer").unwrap().is_empty());
    assert_eq!(
        cache
            .get_entities("Order", &[EntityState::Unchanged])
            .unwrap(),
        vec![o1]
    );
    assert_eq!(
        cache.get_entities(["Customer", "Order"], &[]).unwrap(),
        vec![c, o1, o2, o3]
    );

    let err = cache.get_changes("Invoice").unwrap_err();
    assert!(err.to_string().contains("'Invoice'"));
}

#[test]
fn has_changes_rejects_unknown_type_names() {
    let mut cache = cache();
    let o = order(&mut cache, 10248, None);
    cache.set_value(o, "freight", 32.38).unwrap();

    let err = cache.has_changes(["Order", "Bogus"]).unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("'Bogus'"));
}

#[test]
fn has_changes_follows_accepts_per_type() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o1 = order(&mut cache, 10248, Some(1));
    let o2 = order(&mut cache, 10249, Some(1));
    cache.set_value(o1, "freight", 32.38).unwrap();
    cache.set_value(o2, "freight", 11.61).unwrap();
    cache.set_value(c, "companyName", "Alfreds Futterkiste").unwrap();
    assert!(cache.has_changes("Order").unwrap());

    for id in cache.get_changes("Order").unwrap() {
        assert!(cache.accept_entity_changes(id).unwrap());
    }

    assert!(!cache.has_changes("Order").unwrap());
    assert!(cache.has_changes("Customer").unwrap());
    assert!(cache.has_changes(["Order", "Customer"]).unwrap());
    assert_eq!(cache.state(c).unwrap(), EntityState::Modified);
}

// =============================================================================
// Notifications and atomicity
// =============================================================================

#[test]
fn property_changes_are_published_after_the_operation() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cache
        .subscribe_property_changed(c, move |e| {
            sink.lock().unwrap().push(e.property_name.clone());
        })
        .unwrap();

    cache.set_value(c, "contactName", "Maria").unwrap();
    cache.set_value(c, "address.city", "Berlin").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["contactName", "address.city"]);
}

#[test]
fn collection_changes_are_published() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cache
        .subscribe_array_changed(c, "orders", move |e| {
            sink.lock().unwrap().push((e.added.len(), e.removed.len()));
        })
        .unwrap();

    let o = order(&mut cache, 10248, Some(1));
    cache.set_related(o, "customer", None).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(1, 0), (0, 1)]);
}

#[test]
fn failed_operations_leave_no_trace() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let seen = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&seen);
    cache
        .subscribe_property_changed(c, move |_| *sink.lock().unwrap() += 1)
        .unwrap();

    let result: Result<(), Error> = cache.transaction(|cache| {
        cache.set_value(c, "companyName", "Changed")?;
        cache.set_value(c, "rowVersion", "not a number")
    });
    assert!(result.is_err());
    assert_eq!(cache.get_value(c, "companyName").unwrap(), Value::from("Alfreds"));
    assert_eq!(cache.state(c).unwrap(), EntityState::Unchanged);
    assert_eq!(*seen.lock().unwrap(), 0);
}

#[test]
fn navigation_reads_report_references() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));
    assert_eq!(
        cache.get_property_value(o, "customer").unwrap(),
        PropertyValue::Reference(Some(c))
    );
    assert_eq!(
        cache.get_property_value(c, "orders").unwrap(),
        PropertyValue::Collection(vec![o])
    );
}
