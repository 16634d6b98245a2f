//! Integration tests for relationship fixup
//!
//! Tests navigation and foreign-key consistency as entities arrive,
//! move between parents, and are deleted.

use entigraph_foundation::{EntityState, Value};
use entigraph_storage::{CreateOptions, InitialValues};

use crate::support::{cache, cache_without_cascade, customer, detail, guid, order, unchanged};

// =============================================================================
// Attach-time fixup
// =============================================================================

#[test]
fn parent_first_links_both_sides() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));

    assert_eq!(cache.get_related(o, "customer").unwrap(), Some(c));
    assert_eq!(cache.get_collection(c, "orders").unwrap(), vec![o]);
    assert_eq!(
        cache.get_value(o, "customer.companyName").unwrap(),
        Value::from("Alfreds")
    );
}

#[test]
fn children_first_are_adopted_by_their_parent() {
    let mut cache = cache();
    let o1 = order(&mut cache, 10248, Some(1));
    let o2 = order(&mut cache, 10249, Some(1));
    assert_eq!(cache.get_related(o1, "customer").unwrap(), None);
    assert_eq!(
        cache.get_value(o1, "customer.companyName").unwrap(),
        Value::Null
    );

    let c = customer(&mut cache, 1, "Alfreds");
    assert_eq!(cache.get_collection(c, "orders").unwrap(), vec![o1, o2]);
    assert_eq!(cache.get_related(o2, "customer").unwrap(), Some(c));
    // Adoption is not a user change.
    assert_eq!(cache.state(o1).unwrap(), EntityState::Unchanged);
}

#[test]
fn association_names_pair_navigations() {
    let mut cache = cache();
    let e = cache
        .create_entity_with(
            "Employee",
            InitialValues::new()
                .with("employeeID", 5)
                .with("lastName", "Buchanan"),
            unchanged(),
        )
        .unwrap();
    let o = cache
        .create_entity_with(
            "Order",
            InitialValues::new()
                .with("orderID", 10248)
                .with("employeeID", 5),
            unchanged(),
        )
        .unwrap();
    assert_eq!(cache.get_related(o, "employee").unwrap(), Some(e));
    assert_eq!(cache.get_collection(e, "orders").unwrap(), vec![o]);
}

#[test]
fn composite_keys_and_one_way_navigations() {
    let mut cache = cache();
    let product = cache
        .create_entity_with(
            "Product",
            InitialValues::new()
                .with("productID", 11)
                .with("productName", "Queso Cabrales"),
            unchanged(),
        )
        .unwrap();
    let o = order(&mut cache, 10248, None);
    let d = detail(&mut cache, 10248, 11);

    assert_eq!(cache.get_related(d, "order").unwrap(), Some(o));
    assert_eq!(cache.get_related(d, "product").unwrap(), Some(product));
    assert_eq!(cache.get_collection(o, "orderDetails").unwrap(), vec![d]);
    assert_eq!(
        cache.get_value(d, "product.productName").unwrap(),
        Value::from("Queso Cabrales")
    );
    assert_eq!(
        cache
            .get_entity_by_key("OrderDetail", vec![10248.into(), 11.into()])
            .unwrap(),
        Some(d)
    );
}

// =============================================================================
// Re-parenting
// =============================================================================

#[test]
fn moving_a_child_updates_both_collections() {
    let mut cache = cache();
    let alfreds = customer(&mut cache, 1, "Alfreds");
    let bottom = customer(&mut cache, 2, "Bottom-Dollar");
    let o = order(&mut cache, 10248, Some(1));

    cache.set_related(o, "customer", Some(bottom)).unwrap();
    assert!(cache.get_collection(alfreds, "orders").unwrap().is_empty());
    assert_eq!(cache.get_collection(bottom, "orders").unwrap(), vec![o]);
    assert_eq!(
        cache.get_value(o, "customerID").unwrap(),
        Value::Guid(guid(2))
    );
    assert_eq!(cache.state(o).unwrap(), EntityState::Modified);
    assert_eq!(
        cache.entity(o).unwrap().entity_aspect().original_values()["customerID"],
        Value::Guid(guid(1))
    );
}

#[test]
fn writing_the_foreign_key_moves_the_child() {
    let mut cache = cache();
    let alfreds = customer(&mut cache, 1, "Alfreds");
    let bottom = customer(&mut cache, 2, "Bottom-Dollar");
    let o = order(&mut cache, 10248, Some(1));

    cache.set_value(o, "customerID", guid(2)).unwrap();
    assert_eq!(cache.get_related(o, "customer").unwrap(), Some(bottom));
    assert!(cache.get_collection(alfreds, "orders").unwrap().is_empty());
}

#[test]
fn pushing_a_new_child_attaches_it() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = cache
        .create_entity_with(
            "Order",
            InitialValues::new().with("freight", 32.38),
            CreateOptions::with_state(EntityState::Detached),
        )
        .unwrap();

    cache.push_related(c, "orders", o).unwrap();
    assert_eq!(cache.state(o).unwrap(), EntityState::Added);
    assert_eq!(cache.get_value(o, "orderID").unwrap(), Value::Int(-1));
    assert_eq!(cache.get_value(o, "customerID").unwrap(), Value::Guid(guid(1)));
    assert_eq!(cache.get_collection(c, "orders").unwrap(), vec![o]);
}

#[test]
fn removing_an_added_child_clears_its_foreign_key() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = cache
        .create_entity("Order", InitialValues::new().with("customer", c))
        .unwrap();
    assert_eq!(cache.get_value(o, "customerID").unwrap(), Value::Guid(guid(1)));

    assert!(cache.remove_related(c, "orders", o).unwrap());
    assert_eq!(cache.get_value(o, "customerID").unwrap(), Value::Null);
    assert!(!cache.remove_related(c, "orders", o).unwrap());
}

#[test]
fn creating_with_children_links_them() {
    let mut cache = cache();
    let o1 = order(&mut cache, 10248, None);
    let o2 = order(&mut cache, 10249, None);
    let c = cache
        .create_entity(
            "Customer",
            InitialValues::new()
                .with("companyName", "Around the Horn")
                .with("orders", vec![o1, o2]),
        )
        .unwrap();

    let key = cache.entity_key(c).unwrap();
    assert_eq!(cache.get_collection(c, "orders").unwrap(), vec![o1, o2]);
    assert_eq!(cache.get_value(o1, "customerID").unwrap(), key.values()[0]);
    assert_eq!(cache.state(o2).unwrap(), EntityState::Modified);
}

// =============================================================================
// Deletion
// =============================================================================

#[test]
fn deleting_a_parent_orphans_children_but_keeps_foreign_keys() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));

    cache.set_deleted(c).unwrap();
    assert_eq!(cache.state(c).unwrap(), EntityState::Deleted);
    assert_eq!(cache.get_related(o, "customer").unwrap(), None);
    assert_eq!(cache.get_value(o, "customerID").unwrap(), Value::Guid(guid(1)));
    assert_eq!(cache.state(o).unwrap(), EntityState::Modified);

    // Rejecting the deletion brings the relationship back.
    cache.reject_entity_changes(c).unwrap();
    assert_eq!(cache.get_related(o, "customer").unwrap(), Some(c));
    assert_eq!(cache.get_collection(c, "orders").unwrap(), vec![o]);
}

#[test]
fn deleting_an_order_cascades_to_details() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));
    let d1 = detail(&mut cache, 10248, 11);
    let d2 = detail(&mut cache, 10248, 42);

    cache.set_deleted(o).unwrap();
    assert_eq!(cache.state(d1).unwrap(), EntityState::Deleted);
    assert_eq!(cache.state(d2).unwrap(), EntityState::Deleted);
    assert!(cache.get_collection(c, "orders").unwrap().is_empty());
    assert_eq!(cache.get_changes("OrderDetail").unwrap(), vec![d1, d2]);

    cache.accept_changes().unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.state(d1).unwrap(), EntityState::Detached);
}

#[test]
fn deleting_an_order_without_cascade_leaves_details_modified() {
    let mut cache = cache_without_cascade();
    let o = order(&mut cache, 10248, None);
    let details: Vec<_> = [11, 42, 72]
        .into_iter()
        .map(|product| detail(&mut cache, 10248, product))
        .collect();
    assert_eq!(cache.get_collection(o, "orderDetails").unwrap(), details);

    cache.set_deleted(o).unwrap();

    assert!(cache.get_collection(o, "orderDetails").unwrap().is_empty());
    for &d in &details {
        assert_eq!(cache.state(d).unwrap(), EntityState::Modified);
        assert_eq!(cache.get_related(d, "order").unwrap(), None);
        assert_eq!(cache.get_value(d, "orderID").unwrap(), Value::Int(10248));
    }
    assert_eq!(cache.get_changes("OrderDetail").unwrap(), details);

    cache.reject_changes().unwrap();
    let mut relinked = cache.get_collection(o, "orderDetails").unwrap();
    relinked.sort();
    let mut expected = details.clone();
    expected.sort();
    assert_eq!(relinked, expected);
    assert!(!cache.has_changes("OrderDetail").unwrap());
}

#[test]
fn children_deleted_before_their_parent_stay_deleted() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o1 = order(&mut cache, 10248, Some(1));
    let o2 = order(&mut cache, 10249, Some(1));

    cache.set_deleted(o1).unwrap();
    cache.set_deleted(c).unwrap();

    assert_eq!(cache.state(o1).unwrap(), EntityState::Deleted);
    assert_eq!(cache.state(o2).unwrap(), EntityState::Modified);
    assert!(cache.get_collection(c, "orders").unwrap().is_empty());
    assert_eq!(cache.get_value(o2, "customerID").unwrap(), Value::Guid(guid(1)));
}

#[test]
fn detaching_a_parent_leaves_children_waiting() {
    let mut cache = cache();
    let c = customer(&mut cache, 1, "Alfreds");
    let o = order(&mut cache, 10248, Some(1));

    assert!(cache.detach_entity(c).unwrap());
    assert_eq!(cache.get_related(o, "customer").unwrap(), None);
    assert_eq!(cache.state(o).unwrap(), EntityState::Unchanged);

    cache.attach(c, EntityState::Unchanged).unwrap();
    assert_eq!(cache.get_related(o, "customer").unwrap(), Some(c));
}
