//! Materialized schema graph.
//!
//! A [`DBSchema`] is the arena owning every table, table group and sequence by
//! name. Tables refer to each other (foreign keys, referencings, log and
//! virtual tables) by name through the schema instead of holding pointers to
//! one another.

mod column;
mod group;
mod index;

pub use column::{ColumnDef, DBColumn};
pub use group::{DBColumnGroup, DBReferencing, DBSequence, DBTableGroup};
pub use index::{DBForeignKey, DBIndex};

use crate::config::SchemaConfig;
use crate::connection::{Command, Connection, DBTransaction, Dialect, ExecuteMode, GenericDialect};
use crate::error::{Result, TableDbError};
use crate::table::{DBTable, TableKind};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives auxiliary-write errors that are never escalated to the caller.
pub type ErrorSink = Arc<dyn Fn(&TableDbError) + Send + Sync>;

pub struct DBSchema {
    name: String,
    config: RwLock<SchemaConfig>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    tables: RwLock<IndexMap<String, Arc<DBTable>>>,
    groups: RwLock<IndexMap<String, Arc<DBTableGroup>>>,
    sequences: RwLock<IndexMap<String, Arc<DBSequence>>>,
    error_sink: RwLock<Option<ErrorSink>>,
}

impl DBSchema {
    pub fn new(name: &str) -> Arc<Self> {
        DBSchema::with_config(SchemaConfig::new(name))
    }

    pub fn with_config(config: SchemaConfig) -> Arc<Self> {
        Arc::new(DBSchema {
            name: config.name.clone(),
            config: RwLock::new(config),
            connection: RwLock::new(None),
            tables: RwLock::new(IndexMap::new()),
            groups: RwLock::new(IndexMap::new()),
            sequences: RwLock::new(IndexMap::new()),
            error_sink: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> SchemaConfig {
        self.config.read().clone()
    }

    pub fn database_id(&self) -> i64 {
        self.config.read().database_id
    }

    pub fn set_database_id(&self, id: i64) {
        self.config.write().database_id = id;
    }

    pub fn is_replication(&self) -> bool {
        self.config.read().replication
    }

    pub fn set_replication(&self, replication: bool) {
        self.config.write().replication = replication;
    }

    pub fn is_logging(&self) -> bool {
        self.config.read().logging
    }

    pub fn default_block_size(&self) -> Option<usize> {
        self.config.read().block_size
    }

    pub fn set_connection(&self, connection: Arc<dyn Connection>) {
        *self.connection.write() = Some(connection);
    }

    pub fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| TableDbError::Config(format!("Schema '{}' has no connection", self.name)))
    }

    pub fn has_connection(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Start a transaction on the schema connection.
    pub fn begin(&self) -> Result<DBTransaction> {
        DBTransaction::begin(self.connection()?)
    }

    pub fn tables(&self) -> Vec<Arc<DBTable>> {
        self.tables.read().values().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<Arc<DBTable>> {
        self.tables.read().get(name).cloned()
    }

    pub fn table_or_err(&self, name: &str) -> Result<Arc<DBTable>> {
        self.table(name)
            .ok_or_else(|| TableDbError::not_found("table", name))
    }

    /// Register a table. A table already registered under the same name wins.
    pub fn add_table(&self, table: Arc<DBTable>) -> Arc<DBTable> {
        let mut tables = self.tables.write();
        tables
            .entry(table.name().to_string())
            .or_insert(table)
            .clone()
    }

    pub fn remove_table(&self, name: &str) -> Option<Arc<DBTable>> {
        self.tables.write().shift_remove(name)
    }

    pub fn group(&self, name: &str) -> Option<Arc<DBTableGroup>> {
        self.groups.read().get(name).cloned()
    }

    pub fn get_or_create_group(&self, name: &str) -> Arc<DBTableGroup> {
        self.groups
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DBTableGroup::new(name)))
            .clone()
    }

    pub fn groups(&self) -> Vec<Arc<DBTableGroup>> {
        self.groups.read().values().cloned().collect()
    }

    pub fn get_or_create_sequence(&self, name: &str) -> Arc<DBSequence> {
        self.sequences
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DBSequence::new(name)))
            .clone()
    }

    pub fn sequences(&self) -> Vec<Arc<DBSequence>> {
        self.sequences.read().values().cloned().collect()
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.error_sink.write() = Some(sink);
    }

    /// Route an error that must not abort the current operation.
    pub fn report_error(&self, error: &TableDbError) {
        log::error!("{}: {error}", self.name);
        let sink = self.error_sink.read().clone();
        if let Some(sink) = sink {
            sink(error);
        }
    }

    /// DDL statements for every physical table: sequences, tables, indexes,
    /// then foreign keys unless the dialect declares them inline.
    pub fn format_ddl(&self) -> Vec<String> {
        match self.connection.read().clone() {
            Some(connection) => self.format_ddl_with(connection.dialect()),
            None => self.format_ddl_with(&GenericDialect),
        }
    }

    pub fn format_ddl_with(&self, dialect: &dyn Dialect) -> Vec<String> {
        let tables: Vec<_> = self
            .tables()
            .into_iter()
            .filter(|t| t.kind() != TableKind::Virtual)
            .collect();
        let mut ddl = Vec::new();
        if dialect.supports_sequences() {
            for table in &tables {
                if let Some(sequence) = table.sequence_name() {
                    ddl.push(DBSequence::new(&sequence).format_create(dialect));
                }
            }
        }
        for table in &tables {
            ddl.push(table.format_create(dialect));
        }
        for table in &tables {
            for index in table.indexes() {
                ddl.push(index.format_create(dialect));
            }
        }
        if !dialect.inline_foreign_keys() {
            for table in &tables {
                for fk in table.foreign_keys() {
                    ddl.push(fk.format_create(dialect));
                }
            }
        }
        ddl
    }

    /// Execute the schema DDL against the connection in one transaction.
    pub fn create_database(&self) -> Result<()> {
        let connection = self.connection()?;
        let ddl = self.format_ddl_with(connection.dialect());
        let transaction = DBTransaction::begin(connection.clone())?;
        for statement in &ddl {
            log::debug!("{statement}");
            connection.execute(&Command::new(statement.as_str()), ExecuteMode::NonQuery)?;
        }
        transaction.commit()?;
        log::info!("Created {} statements for schema '{}'", ddl.len(), self.name);
        Ok(())
    }
}

impl std::fmt::Debug for DBSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBSchema")
            .field("name", &self.name)
            .field("tables", &self.tables.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
