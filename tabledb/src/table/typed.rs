use super::{DBItem, DBTable};
use crate::error::{Result, TableDbError};
use crate::query::QueryParameters;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

impl DBTable {
    /// A detached new item filled from a serializable record. Fields are
    /// matched to columns by bound property name, then by column name.
    pub fn new_item_from<T: Serialize>(&self, record: &T) -> Result<Arc<DBItem>> {
        let item = self.new_item();
        self.apply_record(&item, record)?;
        Ok(item)
    }

    /// Copy the fields of a record into an item, tracking changes.
    /// Null fields leave the stored value alone.
    pub fn apply_record<T: Serialize>(&self, item: &Arc<DBItem>, record: &T) -> Result<()> {
        let json = serde_json::to_value(record)?;
        let fields = json
            .as_object()
            .ok_or_else(|| TableDbError::Other("Record must serialize to an object".into()))?;
        for column in self.columns() {
            let field = column
                .property()
                .and_then(|p| fields.get(&p))
                .or_else(|| fields.get(column.name()));
            if let Some(field) = field.filter(|f| !f.is_null()) {
                let value = Value::from_json(field, column.data_type());
                self.set_value(item, &column, value, true);
            }
        }
        Ok(())
    }
}

/// Typed facade over a [`DBTable`] for one record type.
pub struct Table<T> {
    table: Arc<DBTable>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    pub fn new(table: Arc<DBTable>) -> Self {
        Table {
            table,
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &Arc<DBTable> {
        &self.table
    }

    /// Attach a new row built from `record`; written by the next save.
    pub fn insert(&self, record: &T) -> Result<Arc<DBItem>> {
        let item = self.table.new_item_from(record)?;
        self.table.add(&item)?;
        Ok(item)
    }

    pub fn get(&self, id: impl Into<Value>) -> Result<Option<T>> {
        self.table
            .find_by_id(id)
            .map(|item| item.to_record())
            .transpose()
    }

    pub fn all(&self) -> Result<Vec<T>> {
        self.table.items().iter().map(|item| item.to_record()).collect()
    }

    pub fn select(&self, parameters: &QueryParameters) -> Result<Vec<T>> {
        self.table
            .select(parameters)?
            .iter()
            .map(|item| item.to_record())
            .collect()
    }

    pub fn update(&self, item: &Arc<DBItem>, record: &T) -> Result<()> {
        self.table.apply_record(item, record)
    }
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Table {
            table: self.table.clone(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::orders_table;
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: Option<i64>,
        status: Option<String>,
        amount: f64,
        stamp: Option<String>,
    }

    #[test]
    fn test_insert_and_read_back() {
        let (_schema, table) = orders_table();
        let orders: Table<Order> = Table::new(table.clone());
        let item = orders
            .insert(&Order {
                id: Some(9),
                status: Some("New".into()),
                amount: 4.5,
                stamp: None,
            })
            .unwrap();
        assert!(item.is_attached());
        assert_eq!(item.get("amount"), Value::Real(4.5));

        let order = orders.get(9).unwrap().unwrap();
        assert_eq!(order.status.as_deref(), Some("New"));
        assert_eq!(orders.all().unwrap().len(), 1);
    }

    #[test]
    fn test_update_tracks_changes() {
        let (_schema, table) = orders_table();
        let orders: Table<Order> = Table::new(table.clone());
        let mut order = Order {
            id: Some(1),
            status: Some("New".into()),
            amount: 1.0,
            stamp: None,
        };
        let item = orders.insert(&order).unwrap();
        item.accept();

        order.amount = 2.0;
        orders.update(&item, &order).unwrap();
        assert_eq!(item.changed_columns(), vec!["amount".to_string()]);
    }
}
