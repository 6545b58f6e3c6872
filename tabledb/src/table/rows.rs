use super::{DBItem, DBTable, ItemChange, ItemListener, PreparedQuery, UpdateState};
use crate::error::{Result, TableDbError};
use crate::schema::DBColumn;
use crate::value::Value;
use std::sync::{Arc, Weak};

impl DBTable {
    fn allocate_handle(&self) -> usize {
        let mut handles = self.handles.lock();
        match handles.free.pop() {
            Some(handle) => handle,
            None => {
                handles.next += 1;
                handles.next - 1
            }
        }
    }

    pub(crate) fn release_handle(&self, handle: usize) {
        self.handles.lock().free.push(handle);
    }

    fn create_item(&self, update: UpdateState) -> Arc<DBItem> {
        let storage = self.storage_ref();
        let handle = storage.allocate_handle();
        let columns = storage.columns();
        // A reused handle still holds the values of the dropped item.
        for column in &columns {
            column.pull().clear(handle);
        }
        let item_type = self.def.read().item_type.unwrap_or(0);
        let item = DBItem::new(handle, storage.me(), update, item_type);
        if let (true, Some(column)) = (item_type != 0, storage.item_type_key()) {
            column.pull().set(handle, Value::Int(i64::from(item_type)));
        }
        item
    }

    /// A detached new item with column defaults applied. It becomes part of
    /// the table with [`DBTable::add`] and is written by the next save.
    pub fn new_item(&self) -> Arc<DBItem> {
        let item = self.create_item(UpdateState::INSERT);
        for column in self.columns() {
            if let Some(default) = column.default_value() {
                column.pull().set(item.handle(), default);
            }
        }
        item
    }

    /// A detached item for a row read from the backing store.
    pub(crate) fn new_loaded_item(&self) -> Arc<DBItem> {
        self.create_item(UpdateState::DEFAULT)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Snapshot of the rows; later changes do not affect it.
    pub fn items(&self) -> Vec<Arc<DBItem>> {
        self.rows.read().values().cloned().collect()
    }

    pub fn contains(&self, item: &DBItem) -> bool {
        self.rows.read().contains_key(&item.handle())
    }

    pub fn get(&self, handle: usize) -> Option<Arc<DBItem>> {
        self.rows.read().get(&handle).cloned()
    }

    /// Attach an item. On a virtual table a detached item is attached to the
    /// base table (membership then follows the filter); an attached item only
    /// joins the local membership set.
    pub fn add(&self, item: &Arc<DBItem>) -> Result<()> {
        if let Some(base) = &self.base {
            if item.is_attached() {
                self.add_member(item);
                return Ok(());
            }
            return base.add(item);
        }
        if !item.belongs_to(self) {
            return Err(TableDbError::Other(format!(
                "Item does not belong to table '{}'",
                self.name
            )));
        }
        let inserted = {
            let mut rows = self.rows.write();
            if rows.contains_key(&item.handle()) {
                false
            } else {
                rows.insert(item.handle(), item.clone());
                true
            }
        };
        if inserted {
            item.set_attached(true);
            for column in self.columns() {
                if let Some(index) = column.index() {
                    index.add(column.value(item.handle()), item);
                }
            }
            self.notify(item, &ItemChange::Added);
        }
        Ok(())
    }

    /// Detach an item. On a virtual table only the local membership changes.
    pub fn remove(&self, item: &Arc<DBItem>) -> bool {
        if self.base.is_some() {
            return self.remove_member(item);
        }
        let removed = self.rows.write().shift_remove(&item.handle()).is_some();
        if removed {
            item.set_attached(false);
            for column in self.columns() {
                if let Some(index) = column.index() {
                    index.remove(&column.value(item.handle()), item);
                }
            }
            self.notify(item, &ItemChange::Removed);
        }
        removed
    }

    /// Detach every row.
    pub fn clear(&self) {
        let _guard = self.load_lock.lock();
        if self.base.is_some() {
            self.rows.write().clear();
            return;
        }
        let rows = std::mem::take(&mut *self.rows.write());
        for column in self.columns() {
            if let Some(index) = column.index() {
                index.clear();
            }
        }
        for item in rows.values() {
            item.set_attached(false);
            self.notify(item, &ItemChange::Removed);
        }
    }

    fn add_member(&self, item: &Arc<DBItem>) {
        let inserted = self
            .rows
            .write()
            .insert(item.handle(), item.clone())
            .is_none();
        if inserted {
            self.notify(item, &ItemChange::Added);
        }
    }

    fn remove_member(&self, item: &Arc<DBItem>) -> bool {
        let removed = self.rows.write().shift_remove(&item.handle()).is_some();
        if removed {
            self.notify(item, &ItemChange::Removed);
        }
        removed
    }

    /// Store a value of a storage-table column, keeping its index current and
    /// notifying dependents. `track` records the change for the next save.
    pub(crate) fn set_value(
        &self,
        item: &Arc<DBItem>,
        column: &DBColumn,
        value: Value,
        track: bool,
    ) -> bool {
        let data_type = column.data_type();
        let coerced = value.coerce(data_type);
        if coerced.is_null() && !value.is_null() {
            log::warn!(
                "{}.{}: cannot convert {value} to {data_type:?}",
                self.name,
                column.name()
            );
        }
        let value = coerced;
        let old = column.pull().set(item.handle(), value.clone());
        if old == value {
            return false;
        }
        let attached = item.is_attached();
        if attached {
            if let Some(index) = column.index() {
                index.update(&old, value.clone(), item);
            }
        }
        if track {
            item.track_change(column.name(), old, &value);
        }
        if column.has_keys(crate::attribute::ColumnKeys::ITEM_TYPE) {
            item.set_item_type(value.as_i64().unwrap_or(0) as i32);
        }
        if attached {
            self.notify(item, &ItemChange::Updated(Some(column.name().to_string())));
        }
        true
    }

    pub(crate) fn notify_updated(&self, item: &Arc<DBItem>, column: Option<&str>) {
        if item.is_attached() {
            self.storage_ref()
                .notify(item, &ItemChange::Updated(column.map(str::to_string)));
        }
    }

    /// Fan a change out to virtual tables and listeners. Never called while
    /// the row lock is held.
    pub(crate) fn notify(&self, item: &Arc<DBItem>, change: &ItemChange) {
        for table in self.virtual_tables() {
            table.on_base_item_changed(item, change);
        }
        let listeners: Vec<Arc<dyn ItemListener>> = self
            .listeners
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in listeners {
            listener.on_item_changed(item, change);
        }
    }

    /// Rebuild the secondary index of one column from the attached rows.
    pub(crate) fn index_column(&self, column: &DBColumn) {
        if let Some(index) = column.index() {
            index.clear();
            for item in self.rows.read().values() {
                index.add(column.value(item.handle()), item);
            }
        }
    }

    /// Rebuild indexes for columns whose keys now ask for one.
    pub fn refresh_indexes(&self) {
        for column in self.columns() {
            if column.ensure_index().is_some() {
                self.index_column(&column);
            }
        }
    }

    pub(crate) fn prepared_filter(&self) -> Option<Arc<PreparedQuery>> {
        if let Some(prepared) = self.prepared_filter.lock().clone() {
            return Some(prepared);
        }
        let filter = self.filter();
        match PreparedQuery::prepare(self, &filter) {
            Ok(prepared) => {
                let prepared = Arc::new(prepared);
                *self.prepared_filter.lock() = Some(prepared.clone());
                Some(prepared)
            }
            Err(e) => {
                log::warn!("Virtual table '{}': invalid filter: {e}", self.name);
                None
            }
        }
    }

    /// Whether the item satisfies this table's virtual filter.
    pub fn filter_matches(&self, item: &DBItem) -> bool {
        if self.base.is_none() {
            return true;
        }
        self.prepared_filter()
            .map(|prepared| prepared.matches(item))
            .unwrap_or(false)
    }

    /// Recompute virtual membership from the base rows.
    pub fn refresh_membership(&self) {
        let Some(base) = &self.base else { return };
        let members: Vec<_> = base
            .items()
            .into_iter()
            .filter(|item| self.filter_matches(item))
            .collect();
        let mut rows = self.rows.write();
        rows.clear();
        for item in members {
            rows.insert(item.handle(), item);
        }
    }

    fn on_base_item_changed(&self, item: &Arc<DBItem>, change: &ItemChange) {
        match change {
            ItemChange::Removed => {
                self.remove_member(item);
            }
            ItemChange::Added | ItemChange::Updated(_) => {
                let matches = item.is_attached() && self.filter_matches(item);
                let present = self.contains(item);
                match (present, matches) {
                    (false, true) => self.add_member(item),
                    (true, false) => {
                        self.remove_member(item);
                    }
                    (true, true) => self.notify(item, change),
                    (false, false) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::orders_table;
    use super::*;
    use crate::query::{Comparer, QueryParameters};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_indexes_and_remove() {
        let (_schema, table) = orders_table();
        let item = table.new_item();
        item.set("status", "New").unwrap();
        table.add(&item).unwrap();
        assert!(item.is_attached());
        assert_eq!(table.len(), 1);

        let index = table.column("status").unwrap().index().unwrap();
        assert_eq!(index.get(&Value::from("New")).len(), 1);

        item.set("status", "Paid").unwrap();
        assert!(index.get(&Value::from("New")).is_empty());
        assert_eq!(index.get(&Value::from("Paid")).len(), 1);

        assert!(table.remove(&item));
        assert!(!item.is_attached());
        assert!(index.get(&Value::from("Paid")).is_empty());
    }

    #[test]
    fn test_handle_reuse_clears_values() {
        let (_schema, table) = orders_table();
        let handle = {
            let item = table.new_item();
            item.set("status", "Stale").unwrap();
            item.handle()
        };
        let item = table.new_item();
        assert_eq!(item.handle(), handle);
        assert_eq!(item.get("status"), Value::Null);
    }

    #[test]
    fn test_virtual_membership_follows_changes() {
        let (schema, table) = orders_table();
        let paid = DBTable::new_virtual(
            &schema,
            "paid",
            &table,
            QueryParameters::new().and("status", Comparer::EQUAL, "Paid"),
        );
        let item = table.new_item();
        item.set("status", "Pending").unwrap();
        table.add(&item).unwrap();
        assert!(!paid.contains(&item));

        item.set("status", "Paid").unwrap();
        assert!(paid.contains(&item));

        item.set("status", "Void").unwrap();
        assert!(!paid.contains(&item));
    }

    #[test]
    fn test_virtual_add_delegates_to_base() {
        let (schema, table) = orders_table();
        let paid = DBTable::new_virtual(
            &schema,
            "paid",
            &table,
            QueryParameters::new().and("status", Comparer::EQUAL, "Paid"),
        );
        let item = paid.new_item();
        item.set("status", "Paid").unwrap();
        paid.add(&item).unwrap();
        assert!(table.contains(&item));
        assert!(paid.contains(&item));
        assert_eq!(paid.columns().len(), table.columns().len());
    }

    struct Counter(AtomicUsize);

    impl ItemListener for Counter {
        fn on_item_changed(&self, _item: &Arc<DBItem>, _change: &ItemChange) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listeners_are_notified_and_pruned() {
        let (_schema, table) = orders_table();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn ItemListener> = Arc::downgrade(&counter) as Weak<dyn ItemListener>;
        table.add_listener(weak);

        let item = table.new_item();
        table.add(&item).unwrap();
        item.set("amount", 5.0).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        drop(counter);
        table.prune_listeners();
        assert!(table.listeners.read().is_empty());
    }
}
