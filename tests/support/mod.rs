//! Northwind-style schema shared by the integration test targets.

#![allow(dead_code)]

use std::sync::Arc;

use entigraph_foundation::{DataType, EntityId, EntityState, Result};
use entigraph_storage::{
    AutoGeneratedKeyType, Cache, ComplexType, CreateOptions, DataProperty, DataService, Entity,
    EntityCtor, EntityInitializer, EntityType, InitialValues, MetadataStore, NavigationProperty,
    OnDelete, Validator,
};
use uuid::Uuid;

pub const NAMESPACE: &str = "Northwind";

/// Builds the schema.
///
/// - `Location`: complex type (street, city, postalCode)
/// - `Customer`: client-generated GUID key, unmapped `miscData`
/// - `Employee`: identity key
/// - `Order`: identity key, foreign keys to customer and employee
/// - `OrderDetail`: composite key (orderID, productID), cascades from Order
/// - `Product` and `Supplier`: constructor and initializer hooks
pub fn northwind() -> MetadataStore {
    northwind_with(OnDelete::Cascade)
}

/// The same schema with the given delete policy on `Order.orderDetails`.
pub fn northwind_with(order_details: OnDelete) -> MetadataStore {
    let store = MetadataStore::new();
    store.set_name("northwind");
    store.add_data_service(DataService::new("northwind-api").with_server_metadata(true));

    store
        .add_complex_type(
            ComplexType::new("Location", NAMESPACE)
                .with_data_property(DataProperty::new("street", DataType::String))
                .with_data_property(DataProperty::new("city", DataType::String))
                .with_data_property(DataProperty::new("postalCode", DataType::String)),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("Customer", NAMESPACE)
                .with_auto_generated_key(AutoGeneratedKeyType::KeyGenerator)
                .with_default_resource_name("Customers")
                .with_data_property(DataProperty::key("customerID", DataType::Guid))
                .with_data_property(
                    DataProperty::new("companyName", DataType::String)
                        .with_max_length(40)
                        .with_validator(Validator::new("required")),
                )
                .with_data_property(DataProperty::new("contactName", DataType::String))
                .with_data_property(DataProperty::complex("address", "Location"))
                .with_data_property(
                    DataProperty::new("rowVersion", DataType::Int32).with_concurrency(),
                )
                .with_data_property(DataProperty::unmapped("miscData", DataType::String))
                .with_navigation_property(
                    NavigationProperty::to_many("orders", "Order").with_inverse("customer"),
                ),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("Employee", NAMESPACE)
                .with_auto_generated_key(AutoGeneratedKeyType::Identity)
                .with_default_resource_name("Employees")
                .with_data_property(DataProperty::key("employeeID", DataType::Int32))
                .with_data_property(DataProperty::new("firstName", DataType::String))
                .with_data_property(DataProperty::new("lastName", DataType::String))
                .with_navigation_property(
                    NavigationProperty::to_many("orders", "Order")
                        .with_association("Employee_Orders"),
                ),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("Order", NAMESPACE)
                .with_auto_generated_key(AutoGeneratedKeyType::Identity)
                .with_default_resource_name("Orders")
                .with_data_property(DataProperty::key("orderID", DataType::Int32))
                .with_data_property(DataProperty::new("customerID", DataType::Guid))
                .with_data_property(DataProperty::new("employeeID", DataType::Int32))
                .with_data_property(DataProperty::new("orderDate", DataType::DateTime))
                .with_data_property(DataProperty::new("freight", DataType::Decimal))
                .with_data_property(DataProperty::complex("shipTo", "Location"))
                .with_navigation_property(
                    NavigationProperty::to_one("customer", "Customer")
                        .with_foreign_keys(["customerID"])
                        .with_inverse("orders"),
                )
                .with_navigation_property(
                    NavigationProperty::to_one("employee", "Employee")
                        .with_foreign_keys(["employeeID"])
                        .with_association("Employee_Orders"),
                )
                .with_navigation_property(
                    NavigationProperty::to_many("orderDetails", "OrderDetail")
                        .with_inverse("order")
                        .with_on_delete(order_details),
                ),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("OrderDetail", NAMESPACE)
                .with_data_property(DataProperty::key("orderID", DataType::Int32))
                .with_data_property(DataProperty::key("productID", DataType::Int32))
                .with_data_property(DataProperty::new("quantity", DataType::Int16).with_default(1))
                .with_data_property(DataProperty::new("unitPrice", DataType::Decimal))
                .with_navigation_property(
                    NavigationProperty::to_one("order", "Order")
                        .with_foreign_keys(["orderID"])
                        .with_inverse("orderDetails"),
                )
                .with_navigation_property(
                    NavigationProperty::to_one("product", "Product")
                        .with_foreign_keys(["productID"]),
                ),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("Supplier", NAMESPACE)
                .with_auto_generated_key(AutoGeneratedKeyType::Identity)
                .with_data_property(DataProperty::key("supplierID", DataType::Int32))
                .with_data_property(DataProperty::new("companyName", DataType::String))
                .with_data_property(DataProperty::complex("location", "Location"))
                .with_navigation_property(
                    NavigationProperty::to_many("products", "Product").with_inverse("supplier"),
                ),
        )
        .unwrap();

    store
        .add_entity_type(
            EntityType::new("Product", NAMESPACE)
                .with_auto_generated_key(AutoGeneratedKeyType::Identity)
                .with_data_property(DataProperty::key("productID", DataType::Int32))
                .with_data_property(DataProperty::new("productName", DataType::String))
                .with_data_property(DataProperty::new("supplierID", DataType::Int32))
                .with_data_property(
                    DataProperty::new("discontinued", DataType::Boolean).with_nullable(false),
                )
                .with_navigation_property(
                    NavigationProperty::to_one("supplier", "Supplier")
                        .with_foreign_keys(["supplierID"])
                        .with_inverse("products"),
                ),
        )
        .unwrap();

    let supplier_ctor: EntityCtor = Arc::new(|entity: &mut Entity| {
        let _ = entity.set("companyName", "New supplier");
    });
    store
        .register_entity_type_ctor("Supplier", Some(supplier_ctor), None)
        .unwrap();

    let product_initializer: EntityInitializer =
        Arc::new(|cache: &mut Cache, id: EntityId| -> Result<()> {
            if cache.get_value(id, "productName")?.is_null() {
                cache.set_value(id, "productName", "Unnamed")?;
            }
            Ok(())
        });
    store
        .register_entity_type_ctor("Product", None, Some(product_initializer))
        .unwrap();

    store
}

pub fn cache() -> Cache {
    Cache::new(northwind())
}

/// A cache where deleting an order leaves its details in place.
pub fn cache_without_cascade() -> Cache {
    Cache::new(northwind_with(OnDelete::Detach))
}

pub fn guid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn unchanged() -> CreateOptions {
    CreateOptions::with_state(EntityState::Unchanged)
}

/// An unchanged customer with a permanent key.
pub fn customer(cache: &mut Cache, n: u128, name: &str) -> EntityId {
    cache
        .create_entity_with(
            "Customer",
            InitialValues::new()
                .with("customerID", guid(n))
                .with("companyName", name),
            unchanged(),
        )
        .unwrap()
}

/// An unchanged order with a permanent key.
pub fn order(cache: &mut Cache, id: i32, customer: Option<u128>) -> EntityId {
    let mut values = InitialValues::new().with("orderID", id);
    if let Some(n) = customer {
        values = values.with("customerID", guid(n));
    }
    cache.create_entity_with("Order", values, unchanged()).unwrap()
}

/// An unchanged order detail.
pub fn detail(cache: &mut Cache, order_id: i32, product_id: i32) -> EntityId {
    cache
        .create_entity_with(
            "OrderDetail",
            InitialValues::new()
                .with("orderID", order_id)
                .with("productID", product_id),
            unchanged(),
        )
        .unwrap()
}
