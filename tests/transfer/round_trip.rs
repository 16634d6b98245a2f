//! Integration tests for export and import into other caches

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use entigraph_foundation::{EntityState, ErrorKind, Value};
use entigraph_storage::{Cache, InitialValues, MetadataStore, TypeFilter};
use entigraph_transfer::{
    Bundle, ExportOptions, ExportSelection, ImportOptions, export_entities, import_entities,
    import_entities_from_str,
};
use tracing_test::traced_test;

use crate::support::{cache, customer, detail, guid, order, unchanged};

/// Two customers, three orders, one detail, and an employee, with one
/// edited customer and one deleted order.
fn populated() -> Cache {
    let mut cache = cache();
    customer(&mut cache, 1, "Alfreds");
    let bottom = customer(&mut cache, 2, "Bottom-Dollar");
    cache
        .create_entity_with(
            "Employee",
            InitialValues::new()
                .with("employeeID", 5)
                .with("lastName", "Buchanan"),
            unchanged(),
        )
        .unwrap();
    let shipped = cache
        .create_entity_with(
            "Order",
            InitialValues::new()
                .with("orderID", 10248)
                .with("customerID", guid(1))
                .with("employeeID", 5)
                .with("freight", 32.38)
                .with(
                    "orderDate",
                    Value::from(Utc.with_ymd_and_hms(1996, 7, 4, 0, 0, 0).unwrap()),
                ),
            unchanged(),
        )
        .unwrap();
    cache.set_value(shipped, "shipTo.city", "Reims").unwrap();
    detail(&mut cache, 10248, 11);
    order(&mut cache, 10249, Some(2));
    let cancelled = order(&mut cache, 10250, Some(2));

    cache.set_value(bottom, "contactName", "Elizabeth Lincoln").unwrap();
    cache.set_deleted(cancelled).unwrap();
    cache
}

fn export_all(cache: &Cache, options: ExportOptions) -> Bundle {
    export_entities(cache, ExportSelection::All, &options.with_string(false))
        .unwrap()
        .into_bundle()
        .unwrap()
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn bundle_with_metadata_rebuilds_the_cache_elsewhere() {
    let source = populated();
    let json = export_entities(&source, ExportSelection::All, &ExportOptions::default())
        .unwrap()
        .into_json()
        .unwrap();

    let mut target = Cache::new(MetadataStore::new());
    let result = import_entities_from_str(&mut target, &json, &ImportOptions::new()).unwrap();
    assert_eq!(result.entities.len(), source.len());
    assert!(result.temp_key_mapping.is_empty());
    assert_eq!(target.metadata().name().as_deref(), Some("northwind"));
    assert_eq!(target.len(), source.len());

    // Same content, same states, same original values.
    let options = ExportOptions::default().with_metadata(false);
    assert_eq!(
        export_all(&target, options).entity_groups,
        export_all(&source, options).entity_groups
    );

    let alfreds = target
        .get_entity_by_key("Customer", vec![guid(1).into()])
        .unwrap()
        .unwrap();
    let orders = target.get_collection(alfreds, "orders").unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(
        target.get_value(orders[0], "shipTo.city").unwrap(),
        Value::from("Reims")
    );
    assert_eq!(
        target.get_collection(orders[0], "orderDetails").unwrap().len(),
        1
    );
    let employee = target.get_related(orders[0], "employee").unwrap().unwrap();
    assert_eq!(
        target.get_value(employee, "lastName").unwrap(),
        Value::from("Buchanan")
    );
}

#[test]
fn edits_and_deletions_survive_the_trip() {
    let source = populated();
    let mut target = cache();
    let bundle = export_all(&source, ExportOptions::default());
    import_entities(&mut target, &bundle, &ImportOptions::new()).unwrap();

    let bottom = target
        .get_entity_by_key("Customer", vec![guid(2).into()])
        .unwrap()
        .unwrap();
    assert_eq!(target.state(bottom).unwrap(), EntityState::Modified);
    assert_eq!(target.get_collection(bottom, "orders").unwrap().len(), 1);

    target.reject_changes().unwrap();
    assert_eq!(target.get_value(bottom, "contactName").unwrap(), Value::Null);
    assert_eq!(target.get_collection(bottom, "orders").unwrap().len(), 2);
}

#[test]
fn message_pack_carries_the_same_bundle() {
    let source = populated();
    let bundle = export_all(&source, ExportOptions::default().with_metadata(false));
    let bytes = bundle.to_msgpack().unwrap();
    let decoded = Bundle::from_msgpack(&bytes).unwrap();
    assert_eq!(decoded, bundle);

    let mut target = cache();
    import_entities(&mut target, &decoded, &ImportOptions::new()).unwrap();
    assert_eq!(target.len(), source.len());
}

// =============================================================================
// Selections
// =============================================================================

#[test]
fn selections_choose_what_is_exported() {
    let source = populated();
    let empty = export_entities(
        &source,
        ExportSelection::Entities(Vec::new()),
        &ExportOptions::default().with_string(false),
    )
    .unwrap()
    .into_bundle()
    .unwrap();
    assert!(empty.is_empty());
    assert!(empty.metadata.is_some());

    let orders = export_entities(
        &source,
        ExportSelection::Types(vec!["Order".into()]),
        &ExportOptions::default().with_string(false),
    )
    .unwrap()
    .into_bundle()
    .unwrap();
    assert_eq!(orders.entity_groups.len(), 1);
    assert_eq!(orders.entity_groups[0].entity_type, "Order:#Northwind");
    assert_eq!(orders.entity_count(), 3);

    let all = export_all(&source, ExportOptions::default());
    assert_eq!(all.entity_count(), source.len());
}

#[test]
fn importing_an_empty_bundle_changes_nothing() {
    let source = cache();
    let mut target = populated();
    let before = target.get_changes(TypeFilter::All).unwrap();
    let bundle = export_all(&source, ExportOptions::default());
    let result = import_entities(&mut target, &bundle, &ImportOptions::new()).unwrap();
    assert!(result.entities.is_empty());
    assert_eq!(target.get_changes(TypeFilter::All).unwrap(), before);
}

// =============================================================================
// Version hook and failures
// =============================================================================

#[test]
fn version_hook_sees_the_exporting_store() {
    let source = populated();
    let bundle = export_all(&source, ExportOptions::default());
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let options = ImportOptions::new().with_metadata_version_fn(move |info| {
        *sink.lock().unwrap() = info.metadata_store_name.clone();
        Ok(())
    });

    let mut target = cache();
    import_entities(&mut target, &bundle, &options).unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("northwind"));
}

#[test]
fn rejected_versions_import_nothing() {
    let source = populated();
    let bundle = export_all(&source, ExportOptions::default());
    let options = ImportOptions::new().with_metadata_version_fn(|info| {
        Err(format!("unsupported metadata version {}", info.metadata_version))
    });

    let mut target = cache();
    let err = import_entities(&mut target, &bundle, &options).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::VersionMismatch(_)));
    assert!(target.is_empty());
}

#[test]
fn malformed_text_is_a_serialization_error() {
    let mut target = cache();
    let json = "{ \"entityGroups\": 7 }";
    let err = import_entities_from_str(&mut target, json, &ImportOptions::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Serialization(_)));
}

#[test]
#[traced_test]
fn imports_are_logged() {
    let source = populated();
    let mut target = cache();
    let bundle = export_all(&source, ExportOptions::default());
    import_entities(&mut target, &bundle, &ImportOptions::new()).unwrap();
    assert!(logs_contain("exported entities"));
    assert!(logs_contain("imported entities"));
}
