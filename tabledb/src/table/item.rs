use super::DBTable;
use crate::error::{Result, TableDbError};
use crate::value::Value;
use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, Weak};

bitflags! {
    /// Pending change of an item. `COMMIT` marks a change that was written
    /// inside a transaction that has not committed yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateState: u8 {
        const INSERT = 1 << 0;
        const UPDATE = 1 << 1;
        const DELETE = 1 << 2;
        const COMMIT = 1 << 3;
    }
}

impl UpdateState {
    pub const DEFAULT: UpdateState = UpdateState::empty();

    /// Whether a save has something to write.
    pub fn is_pending(self) -> bool {
        self.intersects(UpdateState::INSERT | UpdateState::UPDATE | UpdateState::DELETE)
    }
}

impl Default for UpdateState {
    fn default() -> Self {
        UpdateState::DEFAULT
    }
}

/// Lifecycle status stored in a table's `STATUS` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum DBStatus {
    Empty = 0,
    Actual = 1,
    New = 2,
    Edit = 4,
    Error = 8,
    Delete = 16,
    Archive = 32,
}

impl DBStatus {
    pub fn from_i64(value: i64) -> DBStatus {
        match value {
            1 => DBStatus::Actual,
            2 => DBStatus::New,
            4 => DBStatus::Edit,
            8 => DBStatus::Error,
            16 => DBStatus::Delete,
            32 => DBStatus::Archive,
            _ => DBStatus::Empty,
        }
    }
}

impl From<DBStatus> for Value {
    fn from(status: DBStatus) -> Self {
        Value::Int(status as i64)
    }
}

#[derive(Debug, Default)]
struct ItemState {
    update: UpdateState,
    attached: bool,
    /// Original values of columns changed since the last accept.
    old_values: IndexMap<String, Value>,
    item_type: i32,
}

/// A row of a table.
///
/// The item itself only carries a storage handle and change tracking; its
/// values live in the columns of the storage table. Items are shared as
/// `Arc<DBItem>` between the table, its virtual tables, indexes and views.
pub struct DBItem {
    handle: usize,
    table: Weak<DBTable>,
    state: Mutex<ItemState>,
}

impl DBItem {
    pub(crate) fn new(
        handle: usize,
        table: Weak<DBTable>,
        update: UpdateState,
        item_type: i32,
    ) -> Arc<Self> {
        Arc::new(DBItem {
            handle,
            table,
            state: Mutex::new(ItemState {
                update,
                item_type,
                ..ItemState::default()
            }),
        })
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Storage table holding the item's values.
    pub fn table(&self) -> Option<Arc<DBTable>> {
        self.table.upgrade()
    }

    pub(crate) fn belongs_to(&self, table: &DBTable) -> bool {
        std::ptr::eq(self.table.as_ptr(), table)
    }

    fn table_or_err(&self) -> Result<Arc<DBTable>> {
        self.table()
            .ok_or_else(|| TableDbError::Other("Item table was dropped".into()))
    }

    pub fn get(&self, column: &str) -> Value {
        self.table()
            .and_then(|t| t.column(column))
            .map(|c| c.value(self.handle))
            .unwrap_or(Value::Null)
    }

    /// Set a column value, coerced to the column type, and track the change.
    pub fn set(self: &Arc<Self>, column: &str, value: impl Into<Value>) -> Result<()> {
        let table = self.table_or_err()?;
        let column = table.column_or_err(column)?;
        table.set_value(self, &column, value.into(), true);
        Ok(())
    }

    pub fn primary_id(&self) -> Value {
        self.table()
            .and_then(|t| t.primary_key())
            .map(|c| c.value(self.handle))
            .unwrap_or(Value::Null)
    }

    pub fn status(&self) -> DBStatus {
        self.table()
            .and_then(|t| t.status_key())
            .and_then(|c| c.value(self.handle).as_i64())
            .map(DBStatus::from_i64)
            .unwrap_or(DBStatus::Empty)
    }

    pub fn update_state(&self) -> UpdateState {
        self.state.lock().update
    }

    pub fn is_changed(&self) -> bool {
        self.state.lock().update.is_pending()
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    pub fn item_type(&self) -> i32 {
        self.state.lock().item_type
    }

    pub fn old_value(&self, column: &str) -> Option<Value> {
        self.state.lock().old_values.get(column).cloned()
    }

    /// Columns changed since the item was last accepted.
    pub fn changed_columns(&self) -> Vec<String> {
        self.state.lock().old_values.keys().cloned().collect()
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.state.lock().attached = attached;
    }

    pub(crate) fn set_item_type(&self, item_type: i32) {
        self.state.lock().item_type = item_type;
    }

    pub(crate) fn set_update_state(&self, update: UpdateState) {
        self.state.lock().update = update;
    }

    pub(crate) fn add_update_state(&self, flags: UpdateState) {
        self.state.lock().update |= flags;
    }

    /// Record that `column` moved from `old` to `new`. Returning a column to
    /// its original value drops it from the change set.
    pub(crate) fn track_change(&self, column: &str, old: Value, new: &Value) {
        let mut state = self.state.lock();
        if state.update.contains(UpdateState::INSERT) {
            return;
        }
        match state.old_values.get(column) {
            Some(original) if original == new => {
                state.old_values.shift_remove(column);
            }
            Some(_) => {}
            None => {
                state.old_values.insert(column.to_string(), old);
            }
        }
        if state.old_values.is_empty() {
            state.update.remove(UpdateState::UPDATE);
        } else {
            state.update.insert(UpdateState::UPDATE);
        }
    }

    /// Mark the item for deletion on the next save. An item that was never
    /// saved is detached right away.
    pub fn delete(self: &Arc<Self>) -> Result<()> {
        let table = self.table_or_err()?;
        let unsaved = {
            let mut state = self.state.lock();
            if state.update.contains(UpdateState::INSERT) {
                state.update = UpdateState::DEFAULT;
                true
            } else {
                state.update.insert(UpdateState::DELETE);
                false
            }
        };
        if unsaved {
            table.remove(self);
        } else {
            table.notify_updated(self, None);
        }
        Ok(())
    }

    /// Discard pending changes, restoring original values.
    pub fn reject(self: &Arc<Self>) -> Result<()> {
        let table = self.table_or_err()?;
        let (update, old_values) = {
            let mut state = self.state.lock();
            let update = std::mem::take(&mut state.update);
            (update, std::mem::take(&mut state.old_values))
        };
        if update.contains(UpdateState::INSERT) {
            table.remove(self);
            return Ok(());
        }
        for (name, value) in old_values {
            if let Some(column) = table.column(&name) {
                table.set_value(self, &column, value, false);
            }
        }
        if update.contains(UpdateState::DELETE) {
            table.notify_updated(self, None);
        }
        Ok(())
    }

    /// Called when the transaction that saved the item commits.
    pub(crate) fn accept(self: &Arc<Self>) {
        let deleted = {
            let mut state = self.state.lock();
            let deleted = state.update.contains(UpdateState::DELETE);
            state.update = UpdateState::DEFAULT;
            state.old_values.clear();
            deleted
        };
        if deleted {
            if let Some(table) = self.table() {
                table.remove(self);
            }
        }
    }

    /// Called when the transaction that saved the item rolls back.
    pub(crate) fn reject_commit(&self) {
        self.state.lock().update.remove(UpdateState::COMMIT);
    }

    /// Values keyed by column name, in column order.
    pub fn values(&self) -> Vec<(String, Value)> {
        match self.table() {
            Some(table) => table
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.value(self.handle)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// JSON object keyed by bound property name (column name when unbound).
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(table) = self.table() {
            for column in table.columns() {
                let key = column.property().unwrap_or_else(|| column.name().to_string());
                map.insert(key, column.value(self.handle).to_json());
            }
        }
        serde_json::Value::Object(map)
    }

    /// Deserialize the item into a typed record through its property names.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

impl Drop for DBItem {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.release_handle(self.handle);
        }
    }
}

impl fmt::Debug for DBItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DBItem")
            .field("handle", &self.handle)
            .field("update", &state.update)
            .field("attached", &state.attached)
            .field("item_type", &state.item_type)
            .finish()
    }
}
