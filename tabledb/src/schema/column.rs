use crate::attribute::ColumnKeys;
use crate::connection::Dialect;
use crate::storage::{Pull, PullIndex};
use crate::value::{DataType, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Mutable part of a column, refreshed on every generation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnDef {
    pub data_type: DataType,
    pub size: u32,
    pub scale: u32,
    pub keys: ColumnKeys,
    /// Referenced table for foreign-key columns.
    pub reference_table: Option<String>,
    pub culture: Option<String>,
    /// Mirrored column of the base table (log columns).
    pub base_column: Option<String>,
    pub target_column: Option<String>,
    pub default: Option<Value>,
    pub group: Option<String>,
    /// Property of the mapped type bound to this column.
    pub property: Option<String>,
    pub display_name: Option<String>,
}

impl ColumnDef {
    pub fn new(data_type: DataType, keys: ColumnKeys) -> Self {
        ColumnDef {
            data_type,
            keys,
            ..ColumnDef::default()
        }
    }
}

/// A column of a table together with its in-memory storage.
///
/// Values of every item of the owning table live in the column's [`Pull`],
/// addressed by the item's storage handle. Columns carrying an indexed role
/// also keep a [`PullIndex`] over attached items.
pub struct DBColumn {
    name: String,
    table: String,
    def: RwLock<ColumnDef>,
    pull: Pull,
    index: RwLock<Option<Arc<PullIndex>>>,
}

impl DBColumn {
    pub fn new(table: &str, name: &str, def: ColumnDef, block_size: usize) -> Self {
        let index = def.keys.is_indexed().then(|| Arc::new(PullIndex::new()));
        DBColumn {
            name: name.to_string(),
            table: table.to_string(),
            def: RwLock::new(def),
            pull: Pull::new(block_size),
            index: RwLock::new(index),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn def(&self) -> ColumnDef {
        self.def.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ColumnDef)) {
        f(&mut self.def.write());
    }

    pub fn data_type(&self) -> DataType {
        self.def.read().data_type
    }

    pub fn keys(&self) -> ColumnKeys {
        self.def.read().keys
    }

    pub fn has_keys(&self, keys: ColumnKeys) -> bool {
        self.def.read().keys.contains(keys)
    }

    pub fn reference_table(&self) -> Option<String> {
        self.def.read().reference_table.clone()
    }

    pub fn base_column(&self) -> Option<String> {
        self.def.read().base_column.clone()
    }

    pub fn property(&self) -> Option<String> {
        self.def.read().property.clone()
    }

    pub fn display_name(&self) -> String {
        self.def
            .read()
            .display_name
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn default_value(&self) -> Option<Value> {
        self.def.read().default.clone()
    }

    /// Columns flagged `NO_LOG` are not mirrored into log tables.
    pub fn is_loggable(&self) -> bool {
        !self.def.read().keys.contains(ColumnKeys::NO_LOG)
    }

    pub fn pull(&self) -> &Pull {
        &self.pull
    }

    pub fn value(&self, handle: usize) -> Value {
        self.pull.get(handle)
    }

    pub fn index(&self) -> Option<Arc<PullIndex>> {
        self.index.read().clone()
    }

    /// Create the secondary index if the current keys ask for one.
    /// Returns the index only when it was created by this call.
    pub fn ensure_index(&self) -> Option<Arc<PullIndex>> {
        if !self.keys().is_indexed() {
            return None;
        }
        let mut index = self.index.write();
        if index.is_some() {
            return None;
        }
        let created = Arc::new(PullIndex::new());
        *index = Some(created.clone());
        Some(created)
    }

    /// Column definition for `create table`.
    pub fn format_definition(&self, dialect: &dyn Dialect) -> String {
        let def = self.def.read();
        let mut text = format!(
            "{} {}",
            dialect.format_column(&self.name),
            dialect.format_type(def.data_type, def.size, def.scale)
        );
        if def.keys.contains(ColumnKeys::PRIMARY) {
            text.push_str(" not null primary key");
        } else if def.keys.contains(ColumnKeys::NOT_NULL) {
            text.push_str(" not null");
        }
        text
    }
}

impl fmt::Debug for DBColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DBColumn")
            .field("table", &self.table)
            .field("name", &self.name)
            .field("def", &*self.def.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::GenericDialect;

    #[test]
    fn test_index_follows_keys() {
        let plain = DBColumn::new("orders", "note", ColumnDef::new(DataType::Text, ColumnKeys::empty()), 16);
        assert!(plain.index().is_none());

        let primary = DBColumn::new("orders", "id", ColumnDef::new(DataType::Integer, ColumnKeys::PRIMARY), 16);
        assert!(primary.index().is_some());
        assert!(primary.ensure_index().is_none());

        plain.update(|def| def.keys |= ColumnKeys::INDEXING);
        assert!(plain.ensure_index().is_some());
        assert!(plain.index().is_some());
    }

    #[test]
    fn test_format_definition() {
        let mut def = ColumnDef::new(DataType::Text, ColumnKeys::NOT_NULL);
        def.size = 20;
        let column = DBColumn::new("orders", "code", def, 16);
        assert_eq!(
            column.format_definition(&GenericDialect),
            "\"code\" varchar(20) not null"
        );
    }
}
