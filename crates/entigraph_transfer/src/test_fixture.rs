//! Shared schema for transfer unit tests.

use entigraph_foundation::{DataType, EntityId};
use entigraph_storage::{
    AutoGeneratedKeyType, Cache, ComplexType, DataProperty, EntityType, InitialValues,
    MetadataStore, NavigationProperty,
};

pub(crate) fn store() -> MetadataStore {
    let store = MetadataStore::new();
    store.set_name("transfer-tests");
    store
        .add_complex_type(
            ComplexType::new("Location", "Test")
                .with_data_property(DataProperty::new("city", DataType::String))
                .with_data_property(DataProperty::new("postalCode", DataType::String)),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Customer", "Test")
                .with_auto_generated_key(AutoGeneratedKeyType::KeyGenerator)
                .with_data_property(DataProperty::key("customerID", DataType::Guid))
                .with_data_property(DataProperty::new("companyName", DataType::String))
                .with_data_property(DataProperty::unmapped("miscData", DataType::String))
                .with_navigation_property(
                    NavigationProperty::to_many("orders", "Order").with_inverse("customer"),
                ),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Order", "Test")
                .with_auto_generated_key(AutoGeneratedKeyType::Identity)
                .with_data_property(DataProperty::key("orderID", DataType::Int32))
                .with_data_property(DataProperty::new("customerID", DataType::Guid))
                .with_data_property(DataProperty::new("freight", DataType::Decimal))
                .with_data_property(DataProperty::complex("shipTo", "Location"))
                .with_navigation_property(
                    NavigationProperty::to_one("customer", "Customer")
                        .with_foreign_keys(["customerID"])
                        .with_inverse("orders"),
                ),
        )
        .unwrap();
    store
}

pub(crate) fn cache() -> Cache {
    Cache::new(store())
}

/// Creates an added order belonging to `customer`.
pub(crate) fn order(cache: &mut Cache, customer: EntityId) -> EntityId {
    cache
        .create_entity("Order", InitialValues::new().with("customer", customer))
        .unwrap()
}
