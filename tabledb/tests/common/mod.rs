#![allow(dead_code)]

use std::sync::Arc;
use tabledb::attribute::{PropertyMapping, TableAttribute};
use tabledb::connection::{Command, Connection, ExecuteMode};
use tabledb::{ColumnKeys, DBSchema, DataType, Registry, SqliteConnection, TypeMapping};

/// `Order { id, status, amount }` stored in `orders`.
pub fn order_mapping() -> TypeMapping {
    TypeMapping::new("Order")
        .with_table(TableAttribute::new("orders"))
        .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
        .with_property(PropertyMapping::column("status", DataType::Text, ColumnKeys::INDEXING))
        .with_property(PropertyMapping::column("amount", DataType::Real, ColumnKeys::empty()))
}

/// Same as [`order_mapping`] with an audit log table.
pub fn logged_order_mapping() -> TypeMapping {
    let mut mapping = order_mapping();
    if let Some(table) = mapping.table.as_mut() {
        table.log = true;
    }
    mapping
}

pub fn paid_order_mapping() -> TypeMapping {
    TypeMapping::new("PaidOrder").with_virtual_table("paid_orders", "Order", "status = 'Paid'")
}

/// Generate every registered type into a schema over a fresh in-memory
/// database with the DDL applied.
pub fn connected(registry: &Registry, name: &str) -> (Arc<DBSchema>, Arc<SqliteConnection>) {
    let schema = DBSchema::new(name);
    registry.generate_all(&schema).unwrap();
    let connection = Arc::new(SqliteConnection::open_in_memory().unwrap());
    schema.set_connection(connection.clone());
    schema.create_database().unwrap();
    (schema, connection)
}

pub fn count(connection: &SqliteConnection, sql: &str) -> i64 {
    connection
        .execute(&Command::new(sql), ExecuteMode::Scalar)
        .unwrap()
        .as_i64()
        .unwrap()
}
