//! The live table engine.
//!
//! A [`DBTable`] is both the schema node (columns, indexes, foreign keys,
//! key roles) and the in-memory row collection with its load, select and save
//! pipelines. Virtual tables hold an `Arc` of their base table and delegate
//! storage, identity generation and persistence to it while keeping their own
//! membership set. Log tables are ordinary tables whose rows are written by the
//! save pipeline of their base table.

mod audit;
mod item;
mod load;
mod rows;
mod save;
mod select;
mod snapshot;
mod typed;

pub use audit::LogType;
pub use item::{DBItem, DBStatus, UpdateState};
pub use load::{LoadParam, LoadTask};
pub use select::PreparedQuery;
pub use snapshot::{SnapshotColumn, SnapshotHeader, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use typed::Table;

use crate::attribute::{ColumnKeys, TableKeys};
use crate::connection::{Command, Dialect, ExecuteMode};
use crate::error::{Result, TableDbError};
use crate::query::QueryParameters;
use crate::schema::{
    DBColumn, DBColumnGroup, DBForeignKey, DBIndex, DBReferencing, DBSchema,
};
use crate::storage::{normalize_block_size, DEFAULT_BLOCK_SIZE};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

/// Low bits of a generated id; the database id is packed above them.
pub const ID_BITS: u32 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Table,
    View,
    Virtual,
    Log,
}

/// How an item changed, as seen by virtual tables and views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChange {
    Added,
    Removed,
    /// A value changed; the column is `None` for state-only changes.
    Updated(Option<String>),
}

/// Receives item change notifications from a table.
pub trait ItemListener: Send + Sync {
    fn on_item_changed(&self, item: &Arc<DBItem>, change: &ItemChange);
}

#[derive(Debug, Clone)]
pub enum TableEvent {
    LoadProgress { table: String, count: usize },
    LoadComplete { table: String, count: usize },
    RowUpdating { table: String, item: Arc<DBItem>, state: UpdateState },
    RowUpdated { table: String, item: Arc<DBItem>, state: UpdateState },
    /// Result columns unknown to the table were added as dynamic columns.
    LoadColumns { table: String, columns: Vec<String> },
}

pub type EventHandler = Arc<dyn Fn(&TableEvent) + Send + Sync>;

/// Structural definition of a table, refreshed by the generators.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub kind: TableKind,
    pub keys: TableKeys,
    pub block_size: usize,
    /// Item-type discriminator value → type name.
    pub item_types: BTreeMap<i32, String>,
    pub sequence: Option<String>,
    pub group: Option<String>,
    pub type_name: Option<String>,
    pub columns: IndexMap<String, Arc<DBColumn>>,
    pub indexes: IndexMap<String, DBIndex>,
    pub foreign_keys: IndexMap<String, DBForeignKey>,
    pub referencings: IndexMap<String, DBReferencing>,
    pub column_groups: IndexMap<String, DBColumnGroup>,
    pub log_table: Option<String>,
    /// For log tables: the logged base table.
    pub log_base: Option<String>,
    /// For virtual tables: membership filter over the base table.
    pub filter: QueryParameters,
    /// For item-type virtual tables: the discriminator value of new items.
    pub item_type: Option<i32>,
}

impl TableDef {
    fn new(kind: TableKind) -> Self {
        TableDef {
            kind,
            keys: TableKeys::empty(),
            block_size: DEFAULT_BLOCK_SIZE,
            item_types: BTreeMap::new(),
            sequence: None,
            group: None,
            type_name: None,
            columns: IndexMap::new(),
            indexes: IndexMap::new(),
            foreign_keys: IndexMap::new(),
            referencings: IndexMap::new(),
            column_groups: IndexMap::new(),
            log_table: None,
            log_base: None,
            filter: QueryParameters::new(),
            item_type: None,
        }
    }
}

#[derive(Debug, Default)]
struct Handles {
    next: usize,
    free: Vec<usize>,
}

pub struct DBTable {
    name: String,
    schema: Weak<DBSchema>,
    base: Option<Arc<DBTable>>,
    me: Weak<DBTable>,
    def: RwLock<TableDef>,
    key_cache: Mutex<HashMap<ColumnKeys, Option<Arc<DBColumn>>>>,
    prepared_filter: Mutex<Option<Arc<PreparedQuery>>>,
    rows: RwLock<IndexMap<usize, Arc<DBItem>>>,
    load_lock: ReentrantMutex<()>,
    handles: Mutex<Handles>,
    virtual_tables: RwLock<Vec<Weak<DBTable>>>,
    listeners: RwLock<Vec<Weak<dyn ItemListener>>>,
    handlers: RwLock<Vec<EventHandler>>,
}

impl DBTable {
    fn create(
        schema: &Arc<DBSchema>,
        name: &str,
        base: Option<Arc<DBTable>>,
        def: TableDef,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| DBTable {
            name: name.to_string(),
            schema: Arc::downgrade(schema),
            base,
            me: me.clone(),
            def: RwLock::new(def),
            key_cache: Mutex::new(HashMap::new()),
            prepared_filter: Mutex::new(None),
            rows: RwLock::new(IndexMap::new()),
            load_lock: ReentrantMutex::new(()),
            handles: Mutex::new(Handles::default()),
            virtual_tables: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
        })
    }

    /// A physical table (or log table) of `schema`. The table is not
    /// registered; see [`DBSchema::add_table`].
    pub fn new(schema: &Arc<DBSchema>, name: &str, kind: TableKind) -> Arc<Self> {
        let mut def = TableDef::new(kind);
        if let Some(size) = schema.default_block_size() {
            def.block_size = normalize_block_size(size);
        }
        DBTable::create(schema, name, None, def)
    }

    /// A virtual table over `base`, holding the base rows matching `filter`.
    pub fn new_virtual(
        schema: &Arc<DBSchema>,
        name: &str,
        base: &Arc<DBTable>,
        filter: QueryParameters,
    ) -> Arc<Self> {
        let base = base.storage();
        let mut def = TableDef::new(TableKind::Virtual);
        def.keys = TableKeys::VIRTUAL;
        def.filter = filter;
        let table = DBTable::create(schema, name, Some(base.clone()), def);
        base.virtual_tables.write().push(Arc::downgrade(&table));
        table.refresh_membership();
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Result<Arc<DBSchema>> {
        self.schema
            .upgrade()
            .ok_or_else(|| TableDbError::Config(format!("Table '{}' has no schema", self.name)))
    }

    pub(crate) fn me(&self) -> Weak<DBTable> {
        self.me.clone()
    }

    /// Base table of a virtual table.
    pub fn base(&self) -> Option<&Arc<DBTable>> {
        self.base.as_ref()
    }

    /// The table whose columns hold this table's values.
    pub fn storage(self: &Arc<Self>) -> Arc<DBTable> {
        match &self.base {
            Some(base) => base.clone(),
            None => self.clone(),
        }
    }

    fn storage_ref(&self) -> &DBTable {
        match &self.base {
            Some(base) => base,
            None => self,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.base.is_some()
    }

    pub fn def(&self) -> TableDef {
        self.def.read().clone()
    }

    pub fn update_def(&self, f: impl FnOnce(&mut TableDef)) {
        f(&mut self.def.write());
        self.clear_cache();
    }

    pub fn kind(&self) -> TableKind {
        self.def.read().kind
    }

    pub fn keys(&self) -> TableKeys {
        self.def.read().keys
    }

    pub fn type_name(&self) -> Option<String> {
        self.def.read().type_name.clone()
    }

    pub fn group_name(&self) -> Option<String> {
        self.def.read().group.clone()
    }

    pub fn sequence_name(&self) -> Option<String> {
        match &self.base {
            Some(base) => base.sequence_name(),
            None => self.def.read().sequence.clone(),
        }
    }

    pub fn filter(&self) -> QueryParameters {
        self.def.read().filter.clone()
    }

    pub fn item_types(&self) -> BTreeMap<i32, String> {
        self.storage_ref().def.read().item_types.clone()
    }

    /// Register a subtype in the item-type map. An explicit index wins;
    /// otherwise the next unused integer is assigned. Registering the same type
    /// again returns its existing index.
    pub fn register_item_type(&self, type_name: &str, explicit: Option<i32>) -> i32 {
        let storage = self.storage_ref();
        let mut def = storage.def.write();
        if let Some((index, _)) = def.item_types.iter().find(|(_, name)| *name == type_name) {
            if explicit.map_or(true, |e| e == *index) {
                return *index;
            }
        }
        let index = explicit.unwrap_or_else(|| {
            let mut next = 1;
            while def.item_types.contains_key(&next) {
                next += 1;
            }
            next
        });
        def.item_types.insert(index, type_name.to_string());
        index
    }

    pub fn block_size(&self) -> usize {
        self.storage_ref().def.read().block_size
    }

    /// Round up to a power of two and re-partition every column. Virtual
    /// tables forward to their base.
    pub fn set_block_size(&self, size: usize) {
        let storage = self.storage_ref();
        let size = normalize_block_size(size);
        let columns: Vec<_> = {
            let mut def = storage.def.write();
            def.block_size = size;
            def.columns.values().cloned().collect()
        };
        for column in columns {
            column.pull().set_block_size(size);
        }
    }

    // ── Columns ──────────────────────────────────────────────────────

    pub fn columns(&self) -> Vec<Arc<DBColumn>> {
        self.storage_ref().def.read().columns.values().cloned().collect()
    }

    pub fn column(&self, name: &str) -> Option<Arc<DBColumn>> {
        self.storage_ref().def.read().columns.get(name).cloned()
    }

    pub fn column_or_err(&self, name: &str) -> Result<Arc<DBColumn>> {
        self.column(name)
            .ok_or_else(|| TableDbError::not_found("column", format!("{}.{name}", self.name)))
    }

    /// Add a column unless one with the same name exists; returns the column
    /// held by the table.
    pub fn add_column(&self, column: DBColumn) -> Arc<DBColumn> {
        let storage = self.storage_ref();
        let column = {
            let mut def = storage.def.write();
            def.columns
                .entry(column.name().to_string())
                .or_insert_with(|| Arc::new(column))
                .clone()
        };
        storage.clear_cache();
        storage.index_column(&column);
        column
    }

    /// Swap a column for a new one with the same name, carrying every stored
    /// value over by coercion to the new data type.
    pub fn replace_column(&self, column: DBColumn) -> Arc<DBColumn> {
        let storage = self.storage_ref();
        let column = Arc::new(column);
        let data_type = column.data_type();
        let old = {
            let mut def = storage.def.write();
            def.columns.insert(column.name().to_string(), column.clone())
        };
        if let Some(old) = old {
            for item in storage.rows.read().values() {
                let value = old.value(item.handle()).coerce(data_type);
                column.pull().set(item.handle(), value);
            }
        }
        storage.clear_cache();
        storage.index_column(&column);
        column
    }

    /// Drop a column together with the indexes and foreign keys built on it.
    pub fn remove_column(&self, name: &str) -> Option<Arc<DBColumn>> {
        let storage = self.storage_ref();
        let removed = {
            let mut def = storage.def.write();
            let removed = def.columns.shift_remove(name);
            if removed.is_some() {
                def.indexes.retain(|_, index| !index.columns.iter().any(|c| c == name));
                def.foreign_keys.retain(|_, fk| fk.column != name);
            }
            removed
        };
        if removed.is_some() {
            storage.clear_cache();
        }
        removed
    }

    /// Reorder columns to the given names; unnamed columns keep their
    /// relative order after them.
    pub fn reorder_columns(&self, names: &[String]) {
        let storage = self.storage_ref();
        let mut def = storage.def.write();
        let mut ordered = IndexMap::with_capacity(def.columns.len());
        for name in names {
            if let Some(column) = def.columns.shift_remove(name) {
                ordered.insert(name.clone(), column);
            }
        }
        ordered.extend(def.columns.drain(..));
        def.columns = ordered;
    }

    /// Invalidate cached key-role lookups and compiled virtual filters.
    pub fn clear_cache(&self) {
        self.key_cache.lock().clear();
        *self.prepared_filter.lock() = None;
        for table in self.virtual_tables() {
            table.clear_cache();
        }
    }

    /// The first column carrying all of `keys`. Lookups are cached until the
    /// next structural change.
    pub fn column_by_keys(&self, keys: ColumnKeys) -> Option<Arc<DBColumn>> {
        let storage = self.storage_ref();
        if let Some(cached) = storage.key_cache.lock().get(&keys) {
            return cached.clone();
        }
        let found = storage
            .def
            .read()
            .columns
            .values()
            .find(|c| c.has_keys(keys))
            .cloned();
        storage.key_cache.lock().insert(keys, found.clone());
        found
    }

    pub fn primary_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::PRIMARY)
    }

    pub fn item_type_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::ITEM_TYPE)
    }

    pub fn stamp_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::STAMP)
    }

    pub fn date_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::DATE)
    }

    pub fn code_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::CODE)
    }

    pub fn status_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::STATUS)
    }

    pub fn group_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::GROUP)
    }

    pub fn file_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::FILE)
    }

    pub fn access_key(&self) -> Option<Arc<DBColumn>> {
        self.column_by_keys(ColumnKeys::ACCESS)
    }

    /// Fail when a reserved role is carried by more than one column.
    pub fn check_reserved_keys(&self) -> Result<()> {
        let columns = self.columns();
        for role in ColumnKeys::RESERVED.reserved_roles() {
            let owners: Vec<_> = columns
                .iter()
                .filter(|c| c.has_keys(role))
                .map(|c| c.name().to_string())
                .collect();
            if owners.len() > 1 {
                return Err(TableDbError::Config(format!(
                    "Table '{}': key {role:?} is carried by several columns: {}",
                    self.name,
                    owners.join(", ")
                )));
            }
        }
        Ok(())
    }

    // ── Indexes, references ──────────────────────────────────────────

    pub fn indexes(&self) -> Vec<DBIndex> {
        self.storage_ref().def.read().indexes.values().cloned().collect()
    }

    pub fn index(&self, name: &str) -> Option<DBIndex> {
        self.storage_ref().def.read().indexes.get(name).cloned()
    }

    pub fn set_index(&self, index: DBIndex) {
        self.storage_ref().def.write().indexes.insert(index.name.clone(), index);
    }

    pub fn foreign_keys(&self) -> Vec<DBForeignKey> {
        self.storage_ref().def.read().foreign_keys.values().cloned().collect()
    }

    pub fn set_foreign_key(&self, fk: DBForeignKey) {
        self.storage_ref().def.write().foreign_keys.insert(fk.name.clone(), fk);
    }

    pub fn referencings(&self) -> Vec<DBReferencing> {
        self.def.read().referencings.values().cloned().collect()
    }

    pub fn referencing(&self, name: &str) -> Option<DBReferencing> {
        self.def.read().referencings.get(name).cloned()
    }

    pub fn set_referencing(&self, referencing: DBReferencing) {
        self.def
            .write()
            .referencings
            .insert(referencing.name.clone(), referencing);
    }

    pub fn column_groups(&self) -> Vec<DBColumnGroup> {
        self.storage_ref().def.read().column_groups.values().cloned().collect()
    }

    pub fn set_column_group(&self, group: DBColumnGroup) {
        self.storage_ref().def.write().column_groups.insert(group.name.clone(), group);
    }

    // ── Log table binding ────────────────────────────────────────────

    pub fn log_table_name(&self) -> Option<String> {
        self.storage_ref().def.read().log_table.clone()
    }

    pub fn log_table(&self) -> Option<Arc<DBTable>> {
        let name = self.log_table_name()?;
        self.schema.upgrade()?.table(&name)
    }

    pub fn log_base(&self) -> Option<Arc<DBTable>> {
        let name = self.def.read().log_base.clone()?;
        self.schema.upgrade()?.table(&name)
    }

    /// Whether saves of this table write audit rows.
    pub fn is_logging(&self) -> bool {
        let storage = self.storage_ref();
        if storage.kind() == TableKind::Log || storage.keys().contains(TableKeys::NO_LOGS) {
            return false;
        }
        match storage.schema.upgrade() {
            Some(schema) => {
                schema.is_logging() && !schema.is_replication() && storage.log_table().is_some()
            }
            None => false,
        }
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Next identifier from the table sequence, with the schema database id
    /// packed above [`ID_BITS`].
    pub fn generate_id(&self) -> Result<i64> {
        if let Some(base) = &self.base {
            return base.generate_id();
        }
        let schema = self.schema()?;
        let name = self
            .sequence_name()
            .unwrap_or_else(|| format!("{}_seq", self.name));
        let sequence = schema.get_or_create_sequence(&name);
        let id = sequence.next(|| self.max_id(&schema))?;
        let database_id = schema.database_id();
        Ok(if database_id != 0 {
            id | (database_id << ID_BITS)
        } else {
            id
        })
    }

    fn max_id(&self, schema: &DBSchema) -> Result<i64> {
        let mask = (1i64 << ID_BITS) - 1;
        let primary = self
            .primary_key()
            .ok_or_else(|| TableDbError::Config(format!("Table '{}' has no primary key", self.name)))?;
        let mut max = self
            .items()
            .iter()
            .filter_map(|item| primary.value(item.handle()).as_i64())
            .map(|id| id & mask)
            .max()
            .unwrap_or(0);
        if let Ok(connection) = schema.connection() {
            let dialect = connection.dialect();
            let command = Command::new(format!(
                "select max({}) from {}",
                dialect.format_column(primary.name()),
                dialect.format_table(&self.name)
            ));
            if let Some(stored) = connection.execute(&command, ExecuteMode::Scalar)?.as_i64() {
                max = max.max(stored & mask);
            }
        }
        Ok(max)
    }

    // ── DDL ──────────────────────────────────────────────────────────

    pub fn format_create(&self, dialect: &dyn Dialect) -> String {
        let mut parts: Vec<String> = self
            .columns()
            .iter()
            .map(|c| c.format_definition(dialect))
            .collect();
        if dialect.inline_foreign_keys() {
            parts.extend(self.foreign_keys().iter().map(|fk| fk.format_inline(dialect)));
        }
        format!(
            "create table {} ({})",
            dialect.format_table(&self.name),
            parts.join(", ")
        )
    }

    // ── Dependents and events ────────────────────────────────────────

    pub fn virtual_tables(&self) -> Vec<Arc<DBTable>> {
        let mut tables = self.virtual_tables.write();
        tables.retain(|t| t.strong_count() > 0);
        tables.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn add_listener(&self, listener: Weak<dyn ItemListener>) {
        self.listeners.write().push(listener);
    }

    /// Drop listeners that no longer exist.
    pub fn prune_listeners(&self) {
        self.listeners.write().retain(|l| l.strong_count() > 0);
    }

    pub fn subscribe(&self, handler: impl Fn(&TableEvent) + Send + Sync + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    pub(crate) fn raise(&self, event: TableEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Execute a non-query command on the schema connection.
    pub(crate) fn execute(&self, command: &Command) -> Result<Value> {
        self.schema()?
            .connection()?
            .execute(command, ExecuteMode::NonQuery)
    }
}

impl fmt::Debug for DBTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DBTable")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("rows", &self.rows.read().len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connection::GenericDialect;
    use crate::schema::ColumnDef;
    use crate::value::DataType;

    /// `orders(id PRIMARY, status INDEXING, amount, stamp STAMP)` without a connection.
    pub(crate) fn orders_table() -> (Arc<DBSchema>, Arc<DBTable>) {
        let schema = DBSchema::new("test");
        let table = DBTable::new(&schema, "orders", TableKind::Table);
        let columns = [
            ("id", DataType::Integer, ColumnKeys::PRIMARY),
            ("status", DataType::Text, ColumnKeys::INDEXING),
            ("amount", DataType::Real, ColumnKeys::empty()),
            ("stamp", DataType::DateTime, ColumnKeys::STAMP),
        ];
        for (name, data_type, keys) in columns {
            table.add_column(DBColumn::new(
                "orders",
                name,
                ColumnDef::new(data_type, keys),
                table.block_size(),
            ));
        }
        schema.add_table(table.clone());
        (schema, table)
    }

    #[test]
    fn test_key_cache_invalidated_on_column_change() {
        let (_schema, table) = orders_table();
        assert_eq!(table.primary_key().unwrap().name(), "id");
        assert!(table.code_key().is_none());

        table.add_column(DBColumn::new(
            "orders",
            "code",
            ColumnDef::new(DataType::Text, ColumnKeys::CODE),
            16,
        ));
        assert_eq!(table.code_key().unwrap().name(), "code");
    }

    #[test]
    fn test_reserved_keys_must_be_unique() {
        let (_schema, table) = orders_table();
        assert!(table.check_reserved_keys().is_ok());
        table.add_column(DBColumn::new(
            "orders",
            "id2",
            ColumnDef::new(DataType::Integer, ColumnKeys::PRIMARY),
            16,
        ));
        assert!(table.check_reserved_keys().unwrap_err().is_config());
    }

    #[test]
    fn test_block_size_rounds_and_propagates() {
        let (schema, table) = orders_table();
        let paid = DBTable::new_virtual(&schema, "paid", &table, QueryParameters::new());
        paid.set_block_size(100);
        assert_eq!(table.block_size(), 128);
        assert_eq!(table.column("status").unwrap().pull().block_size(), 128);
        table.set_block_size(5);
        assert_eq!(paid.block_size(), 8);
    }

    #[test]
    fn test_generate_id_without_connection() {
        let (schema, table) = orders_table();
        assert_eq!(table.generate_id().unwrap(), 1);
        assert_eq!(table.generate_id().unwrap(), 2);

        schema.set_database_id(3);
        assert_eq!(table.generate_id().unwrap(), 3 | (3 << ID_BITS));
    }

    #[test]
    fn test_register_item_type() {
        let (_schema, table) = orders_table();
        assert_eq!(table.register_item_type("Invoice", None), 1);
        assert_eq!(table.register_item_type("Receipt", None), 2);
        assert_eq!(table.register_item_type("Invoice", None), 1);
        assert_eq!(table.register_item_type("Special", Some(7)), 7);
        assert_eq!(table.item_types().len(), 3);
    }

    #[test]
    fn test_structure_set_through_virtual_table_lands_on_base() {
        let (schema, table) = orders_table();
        let paid = DBTable::new_virtual(&schema, "paid", &table, QueryParameters::new());
        let mut index = DBIndex::new("orders", "ix_orders_amount", false);
        index.columns.push("amount".into());
        paid.set_index(index);
        paid.set_column_group(DBColumnGroup {
            name: "totals".into(),
            order: 1,
        });
        assert!(table.index("ix_orders_amount").is_some());
        assert_eq!(table.column_groups().len(), 1);

        table.remove_column("amount");
        assert!(table.index("ix_orders_amount").is_none());
        assert!(paid.indexes().is_empty());
    }

    #[test]
    fn test_format_create() {
        let (_schema, table) = orders_table();
        assert_eq!(
            table.format_create(&GenericDialect),
            "create table \"orders\" (\"id\" bigint not null primary key, \"status\" text, \"amount\" double precision, \"stamp\" timestamp)"
        );
    }
}
