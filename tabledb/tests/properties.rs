mod common;

use common::{connected, count, logged_order_mapping, order_mapping, paid_order_mapping};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use tabledb::attribute::{PropertyMapping, TableAttribute};
use tabledb::query::QueryOrder;
use tabledb::view::{DBTableView, ViewMode};
use tabledb::{
    ColumnKeys, Comparer, DBItem, DBSchema, DBTable, DataType, LoadParam, LogType, QQuery,
    QueryParameters, Registry, TypeMapping, UpdateState, Value,
};

fn customer_mapping() -> TypeMapping {
    TypeMapping::new("Customer")
        .with_table(TableAttribute::new("customers"))
        .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
        .with_property(PropertyMapping::column("name", DataType::Text, ColumnKeys::empty()))
}

fn order(table: &DBTable, id: i64, status: &str, amount: f64) -> Arc<DBItem> {
    let item = table.new_item();
    item.set("id", id).unwrap();
    item.set("status", status).unwrap();
    item.set("amount", amount).unwrap();
    table.add(&item).unwrap();
    item
}

fn ids(items: &[Arc<DBItem>]) -> BTreeSet<i64> {
    items.iter().filter_map(|i| i.primary_id().as_i64()).collect()
}

fn shape(table: &DBTable) -> (Vec<String>, Vec<String>, Vec<String>) {
    (
        table.columns().iter().map(|c| c.name().to_string()).collect(),
        table.indexes().into_iter().map(|i| i.name).collect(),
        table.foreign_keys().into_iter().map(|fk| fk.name).collect(),
    )
}

#[test]
fn p1_generation_is_idempotent() {
    let registry = Registry::new();
    registry.register(customer_mapping());
    registry.register(order_mapping().with_property(
        PropertyMapping::column("customer_id", DataType::Integer, ColumnKeys::empty())
            .with_reference("Customer"),
    ));
    let schema = DBSchema::new("main");
    let first = registry.generate("Order", &schema).unwrap();
    let before = shape(&first);
    assert_eq!(before.2.len(), 1);

    let second = registry.generate("Order", &schema).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(shape(&second), before);

    // Re-registering drops the memo; the regenerated table is synced in place.
    registry.register(customer_mapping());
    let third = registry.generate("Order", &schema).unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(shape(&third), before);
}

#[test]
fn p2_discriminator_and_primary_key_lead() {
    let registry = Registry::new();
    registry.register(
        TypeMapping::new("Shipment")
            .with_table(TableAttribute::new("shipments"))
            .with_property(PropertyMapping::column("weight", DataType::Real, ColumnKeys::empty()))
            .with_property(PropertyMapping::column("carrier", DataType::Text, ColumnKeys::empty()))
            .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
            .with_property(PropertyMapping::column("note", DataType::Text, ColumnKeys::empty()))
            .with_property(PropertyMapping::column(
                "kind",
                DataType::Integer,
                ColumnKeys::ITEM_TYPE,
            )),
    );
    let table = registry.generate("Shipment", &DBSchema::new("main")).unwrap();
    let names: Vec<_> = table.columns().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["kind", "id", "weight", "carrier", "note"]);
}

#[test]
fn p3_index_lookup_matches_linear_scan() {
    let registry = Registry::new();
    registry.register(order_mapping());
    let schema = DBSchema::new("main");
    let orders = registry.generate("Order", &schema).unwrap();
    assert!(orders.column("status").unwrap().index().is_some());

    for (id, status) in [(1, "Paid"), (2, "New"), (3, "Paid"), (4, "Void"), (5, "Paid")] {
        order(&orders, id, status, id as f64);
    }
    orders.find_by_id(4).unwrap().set("status", "Paid").unwrap();

    for status in ["Paid", "New", "Void", "Missing"] {
        let indexed = orders.select_column("status", Comparer::EQUAL, status).unwrap();
        let scanned: Vec<_> = orders
            .items()
            .into_iter()
            .filter(|i| i.get("status") == Value::from(status))
            .collect();
        assert_eq!(ids(&indexed), ids(&scanned), "status {status}");
    }
    assert_eq!(
        ids(&orders.select_column("status", Comparer::EQUAL, "Paid").unwrap()).len(),
        4
    );
}

#[test]
fn p4_virtual_rows_satisfy_the_filter() {
    let registry = Registry::new();
    registry.register(order_mapping());
    registry.register(paid_order_mapping());
    let schema = DBSchema::new("main");
    let paid = registry.generate("PaidOrder", &schema).unwrap();
    let orders = schema.table("orders").unwrap();

    let items: Vec<_> = (1..=6)
        .map(|id| order(&orders, id, if id % 2 == 0 { "Paid" } else { "New" }, 1.0))
        .collect();
    items[0].set("status", "Paid").unwrap();
    items[1].set("status", "Void").unwrap();
    orders.remove(&items[2]);

    let filter = QueryParameters::parse("status = 'Paid'").unwrap();
    for item in paid.items() {
        assert!(orders.matches(&item, &filter).unwrap());
    }
    let expected = ids(&orders.select(&filter).unwrap());
    assert_eq!(ids(&paid.items()), expected);

    paid.refresh_membership();
    assert_eq!(ids(&paid.items()), expected);
    assert_eq!(expected, BTreeSet::from([1, 4, 6]));
}

#[test]
fn p5_saved_row_loads_back_equal() {
    let registry = Registry::new();
    registry.register(order_mapping());
    let (schema, connection) = connected(&registry, "main");
    let orders = schema.table("orders").unwrap();

    let item = orders.new_item();
    item.set("status", "New").unwrap();
    item.set("amount", 12.5).unwrap();
    orders.add(&item).unwrap();
    orders.save().unwrap();
    let id = item.primary_id();

    let replica = DBSchema::new("replica");
    replica.set_connection(connection);
    let fresh = registry.generate("Order", &replica).unwrap();
    assert!(!Arc::ptr_eq(&orders, &fresh));
    let loaded = fresh.load_by_id(id, LoadParam::LOAD).unwrap().unwrap();
    assert_eq!(loaded.values(), item.values());
}

#[test]
fn p6_check_deleted_evicts_from_table_and_static_view() {
    let registry = Registry::new();
    registry.register(order_mapping());
    let (schema, connection) = connected(&registry, "main");
    connection
        .execute_batch(
            "insert into orders (id, status, amount) values
                (1, 'Paid', 10.0), (2, 'Paid', 20.0), (3, 'Paid', 30.0), (4, 'New', 40.0);",
        )
        .unwrap();
    let orders = schema.table("orders").unwrap();
    let view = DBTableView::with_filter(
        orders.clone(),
        "status = 'Paid'",
        ViewMode::STATIC | ViewMode::EMPTY,
    )
    .unwrap();
    view.load(LoadParam::LOAD).unwrap();
    assert_eq!(ids(&view.items()), BTreeSet::from([1, 2, 3]));

    let pending = order(&orders, 9, "Paid", 90.0);
    connection.execute_batch("delete from orders where id = 3").unwrap();
    view.load(LoadParam::LOAD | LoadParam::CHECK_DELETED).unwrap();

    assert!(orders.find_by_id(3).is_none());
    assert_eq!(ids(&view.items()), BTreeSet::from([1, 2]));
    assert!(orders.contains(&pending));
    assert!(orders.find_by_id(4).is_none());
}

#[test]
fn p7_update_is_mirrored_in_the_log() {
    let registry = Registry::new();
    registry.register(logged_order_mapping());
    let (schema, _connection) = connected(&registry, "main");
    let orders = schema.table("orders").unwrap();

    let item = orders.new_item();
    item.set("status", "New").unwrap();
    item.set("amount", 5.0).unwrap();
    orders.add(&item).unwrap();
    orders.save().unwrap();

    item.set("amount", 7.5).unwrap();
    orders.save().unwrap();

    let log = orders.log_items(&item).unwrap();
    let last = log
        .iter()
        .find(|row| row.get("log_type") == Value::from(LogType::Update))
        .unwrap();
    assert_eq!(last.get("amount"), Value::Real(7.5));
    let base = orders.find_by_id(last.get("base_id")).unwrap();
    assert!(Arc::ptr_eq(&base, &item));
}

#[test]
fn p8_live_view_drops_rows_that_stop_matching() {
    let registry = Registry::new();
    registry.register(order_mapping());
    let schema = DBSchema::new("main");
    let orders = registry.generate("Order", &schema).unwrap();
    for (id, amount) in [(1, 30.0), (2, 10.0), (3, 20.0)] {
        order(&orders, id, "Paid", amount);
    }
    let view = DBTableView::with_filter(orders.clone(), "status = 'Paid'", ViewMode::empty())
        .unwrap();
    view.set_sort(&[QueryOrder {
        column: "amount".into(),
        descending: false,
    }])
    .unwrap();
    let ordered = |view: &DBTableView| -> Vec<i64> {
        view.items()
            .iter()
            .filter_map(|i| i.primary_id().as_i64())
            .collect()
    };
    assert_eq!(ordered(&view), vec![2, 3, 1]);

    orders.find_by_id(3).unwrap().set("status", "Void").unwrap();
    assert_eq!(ordered(&view), vec![2, 1]);

    orders.find_by_id(1).unwrap().set("amount", 5.0).unwrap();
    assert_eq!(ordered(&view), vec![1, 2]);
}

#[test]
fn p9_rolled_back_log_rows_leave_no_trace() {
    let registry = Registry::new();
    registry.register(logged_order_mapping());
    let (schema, connection) = connected(&registry, "main");
    let orders = schema.table("orders").unwrap();
    let log_table = orders.log_table().unwrap();

    let item = orders.new_item();
    item.set("status", "New").unwrap();
    item.set("amount", 5.0).unwrap();
    orders.add(&item).unwrap();

    let transaction = schema.begin().unwrap();
    assert!(orders.save_item(&item, &transaction).unwrap());
    assert_eq!(orders.log_items(&item).unwrap().len(), 1);
    transaction.rollback().unwrap();

    assert_eq!(item.update_state(), UpdateState::INSERT);
    assert!(orders.log_items(&item).unwrap().is_empty());
    assert!(log_table.items().is_empty());
    assert_eq!(count(&connection, "select count(*) from orders_log"), 0);

    orders.save().unwrap();
    let log = orders.log_items(&item).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].update_state(), UpdateState::DEFAULT);
    assert_eq!(count(&connection, "select count(*) from orders_log"), 1);
}

#[test]
fn p10_load_and_select_agree_on_mixed_chains() {
    let registry = Registry::new();
    registry.register(order_mapping());
    let (schema, connection) = connected(&registry, "main");
    connection
        .execute_batch(
            "insert into orders (id, status, amount) values
                (1, 'New', 10.0), (2, 'Paid', 20.0), (3, 'Paid', 30.0);",
        )
        .unwrap();
    let orders = schema.table("orders").unwrap();

    let query = QQuery::new("orders")
        .and("status", Comparer::EQUAL, "New")
        .or("status", Comparer::EQUAL, "Paid")
        .and("amount", Comparer::GREATER, 25);
    let loaded = orders.load(&query, LoadParam::LOAD, None).unwrap().unwrap();
    assert_eq!(ids(&loaded), BTreeSet::from([3]));
    assert_eq!(ids(&orders.items()), BTreeSet::from([3]));

    orders.load_all().unwrap();
    assert_eq!(orders.items().len(), 3);
    assert_eq!(ids(&orders.select(&query.parameters).unwrap()), ids(&loaded));
}
