use super::{DBItem, DBTable, TableEvent, UpdateState};
use crate::attribute::ColumnKeys;
use crate::connection::{CancelToken, DBTransaction, ExecuteMode, ResultRow};
use crate::error::{Result, TableDbError};
use crate::query::{Comparer, Logic, QQuery, QueryParameters, QueryValue};
use crate::schema::{ColumnDef, DBColumn};
use crate::value::Value;
use crate::view::DBTableView;
use bitflags::bitflags;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Rows between two `LoadProgress` events.
const PROGRESS_STEP: usize = 100;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadParam: u8 {
        /// Query the backing store when a row is not cached.
        const LOAD = 1 << 0;
        /// Load rows referenced by the loaded rows.
        const REFERENCE_ROW = 1 << 1;
        /// Evict cached rows matching the filter that the store no longer has.
        const CHECK_DELETED = 1 << 2;
        const GET_COUNT = 1 << 3;
        /// Skip rows whose cached stamp is newer or equal.
        const SYNCHRONIZE = 1 << 4;
    }
}

impl Default for LoadParam {
    fn default() -> Self {
        LoadParam::LOAD
    }
}

type LoadResult = Result<Option<Vec<Arc<DBItem>>>>;

/// A load running on a worker thread.
pub struct LoadTask {
    handle: JoinHandle<LoadResult>,
    cancel: CancelToken,
}

impl LoadTask {
    /// Ask the load to stop after the current row.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the load. `Ok(None)` when it was canceled.
    pub fn join(self) -> LoadResult {
        self.handle
            .join()
            .map_err(|_| TableDbError::Other("Load worker panicked".into()))?
    }
}

impl DBTable {
    /// Load rows matching `query` in a transaction of its own.
    /// Returns `Ok(None)` when the load was canceled.
    pub fn load(&self, query: &QQuery, param: LoadParam, view: Option<&DBTableView>) -> LoadResult {
        let transaction = self.schema()?.begin()?;
        match self.load_with(&transaction, query, param, view) {
            Ok(result) => {
                transaction.commit()?;
                Ok(result)
            }
            Err(e) => {
                transaction.rollback()?;
                Err(e)
            }
        }
    }

    /// Run a load on a worker thread. The worker owns the connection's
    /// transaction until the load ends, so other threads' statements wait.
    pub fn load_async(self: &Arc<Self>, query: QQuery, param: LoadParam) -> Result<LoadTask> {
        let connection = self.schema()?.connection()?;
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let table = self.clone();
        let handle = thread::spawn(move || {
            let transaction = DBTransaction::begin_with(connection, token)?;
            match table.load_with(&transaction, &query, param, None) {
                Ok(result) => {
                    transaction.commit()?;
                    Ok(result)
                }
                Err(e) => {
                    transaction.rollback()?;
                    Err(e)
                }
            }
        });
        Ok(LoadTask { handle, cancel })
    }

    /// Load inside an existing transaction. Rows are attached as they are
    /// read; a canceled transaction stops the read and returns `Ok(None)`.
    pub fn load_with(
        &self,
        transaction: &DBTransaction,
        query: &QQuery,
        param: LoadParam,
        view: Option<&DBTableView>,
    ) -> LoadResult {
        let storage = self.storage_ref();
        let _guard = storage.load_lock.lock();
        let connection = transaction.connection().clone();
        let dialect = connection.dialect();
        let server = self.server_query(query);

        if param.contains(LoadParam::GET_COUNT) {
            let count = connection
                .execute(&server.format_count(dialect), ExecuteMode::Scalar)?
                .as_i64()
                .unwrap_or(0);
            log::debug!("{}: {count} rows to load", self.name);
            storage.rows.write().reserve(count.max(0) as usize);
        }

        let primary = storage.primary_key().ok_or_else(|| {
            TableDbError::Config(format!("Table '{}' has no primary key", storage.name))
        })?;
        let stamp = if param.contains(LoadParam::SYNCHRONIZE) {
            storage.stamp_key()
        } else {
            None
        };

        let mut mapping: Option<Vec<Option<Arc<DBColumn>>>> = None;
        let mut loaded = Vec::new();
        let mut seen = HashSet::new();
        let mut canceled = false;
        let command = server.format_select(dialect);
        log::debug!("{}", command.text);
        connection.read(&command, &mut |row| {
            if transaction.is_canceled() {
                canceled = true;
                return Ok(ControlFlow::Break(()));
            }
            if mapping.is_none() {
                mapping = Some(storage.map_columns(row));
            }
            let columns = mapping.as_deref().unwrap_or(&[]);
            if let Some(item) = storage.resolve_row(row, columns, &primary, stamp.as_deref())? {
                if let Some(view) = view {
                    view.add_loaded(&item);
                }
                if seen.insert(item.handle()) {
                    loaded.push(item);
                }
                if loaded.len() % PROGRESS_STEP == 0 {
                    self.raise(TableEvent::LoadProgress {
                        table: self.name.clone(),
                        count: loaded.len(),
                    });
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        if canceled {
            log::info!("{}: load canceled after {} rows", self.name, loaded.len());
            return Ok(None);
        }

        if param.contains(LoadParam::REFERENCE_ROW) {
            storage.load_references(transaction, &loaded)?;
        }
        if param.contains(LoadParam::CHECK_DELETED) {
            self.evict_deleted(&query.parameters, &seen, view)?;
        }

        let loaded: Vec<_> = if self.is_virtual() {
            loaded.into_iter().filter(|item| self.contains(item)).collect()
        } else {
            loaded
        };
        log::debug!("{}: loaded {} rows", self.name, loaded.len());
        self.raise(TableEvent::LoadComplete {
            table: self.name.clone(),
            count: loaded.len(),
        });
        Ok(Some(loaded))
    }

    /// The query sent to the store: always against the storage table, with a
    /// virtual table's filter and-ed in front.
    fn server_query(&self, query: &QQuery) -> QQuery {
        let mut query = query.clone();
        query.table = self.storage_ref().name.clone();
        let filter = self.filter();
        if self.is_virtual() && !filter.is_empty() {
            query.parameters = if query.parameters.is_empty() {
                filter
            } else {
                QueryParameters::new()
                    .group(Logic::AND, filter)
                    .group(Logic::AND, query.parameters)
            };
        }
        query
    }

    /// Bind result columns to table columns, adding a dynamic column for each
    /// unknown one.
    fn map_columns(&self, row: &ResultRow) -> Vec<Option<Arc<DBColumn>>> {
        let mut added = Vec::new();
        let mapping = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if let Some(column) = self.column(name) {
                    return Some(column);
                }
                let found = self
                    .columns()
                    .into_iter()
                    .find(|c| c.name().eq_ignore_ascii_case(name));
                if found.is_some() {
                    return found;
                }
                let def = ColumnDef::new(row.value(i).data_type(), ColumnKeys::empty());
                added.push(name.clone());
                Some(self.add_column(DBColumn::new(&self.name, name, def, self.block_size())))
            })
            .collect();
        if !added.is_empty() {
            log::info!("{}: added dynamic columns {}", self.name, added.join(", "));
            self.raise(TableEvent::LoadColumns {
                table: self.name.clone(),
                columns: added,
            });
        }
        mapping
    }

    /// Find or materialize the item for one result row. A cached item wins:
    /// its pending edits are kept, and with a stamp column a read that is not
    /// newer than the cached copy is discarded.
    fn resolve_row(
        &self,
        row: &ResultRow,
        columns: &[Option<Arc<DBColumn>>],
        primary: &Arc<DBColumn>,
        stamp: Option<&DBColumn>,
    ) -> Result<Option<Arc<DBItem>>> {
        let value_of = |target: &DBColumn| {
            columns
                .iter()
                .position(|c| c.as_ref().is_some_and(|c| std::ptr::eq(c.as_ref(), target)))
                .map(|i| row.value(i).coerce(target.data_type()))
        };
        let id = value_of(&**primary).unwrap_or(Value::Null);
        if id.is_null() {
            log::warn!("{}: skipped a row without primary key", self.name);
            return Ok(None);
        }
        if let Some(existing) = self.find_by_id(id) {
            if existing.is_changed() {
                return Ok(Some(existing));
            }
            if let Some(stamp) = stamp {
                let local = stamp.value(existing.handle());
                let remote = value_of(stamp).unwrap_or(Value::Null);
                if !local.is_null() && local >= remote {
                    return Ok(Some(existing));
                }
            }
            self.apply_row(&existing, row, columns);
            return Ok(Some(existing));
        }
        let item = self.new_loaded_item();
        self.apply_row(&item, row, columns);
        self.add(&item)?;
        Ok(Some(item))
    }

    fn apply_row(&self, item: &Arc<DBItem>, row: &ResultRow, columns: &[Option<Arc<DBColumn>>]) {
        for (i, column) in columns.iter().enumerate() {
            if let Some(column) = column {
                self.set_value(item, column, row.value(i).clone(), false);
            }
        }
    }

    /// Load referenced rows that are not cached yet.
    fn load_references(&self, transaction: &DBTransaction, loaded: &[Arc<DBItem>]) -> Result<()> {
        let schema = self.schema()?;
        for column in self.columns() {
            let Some(target_name) = column.reference_table() else {
                continue;
            };
            let Some(target) = schema.table(&target_name) else {
                continue;
            };
            let Some(target_primary) = target.primary_key() else {
                continue;
            };
            let mut missing: Vec<Value> = loaded
                .iter()
                .map(|item| column.value(item.handle()))
                .filter(|id| !id.is_null() && target.find_by_id(id.clone()).is_none())
                .collect();
            missing.sort();
            missing.dedup();
            if missing.is_empty() {
                continue;
            }
            log::debug!("{}: loading {} rows of {}", self.name, missing.len(), target.name());
            let query = QQuery::new(target.name()).with_parameters(QueryParameters::new().and_value(
                target_primary.name(),
                Comparer::IN,
                QueryValue::List(missing),
            ));
            target.load_with(transaction, &query, LoadParam::LOAD, None)?;
        }
        Ok(())
    }

    /// Evict cached rows that match `filter` but were not returned by the
    /// load. Pending inserts stay. A virtual table only looks at its members.
    fn evict_deleted(
        &self,
        filter: &QueryParameters,
        seen: &HashSet<usize>,
        view: Option<&DBTableView>,
    ) -> Result<()> {
        let candidates = self.select(filter)?;
        let mut evicted = 0;
        for item in candidates {
            if seen.contains(&item.handle()) || item.update_state().contains(UpdateState::INSERT) {
                continue;
            }
            self.storage_ref().remove(&item);
            if let Some(view) = view {
                view.remove(&item);
            }
            evicted += 1;
        }
        if evicted > 0 {
            log::debug!("{}: evicted {evicted} deleted rows", self.name);
        }
        Ok(())
    }

    /// All rows of the table.
    pub fn load_all(&self) -> Result<Vec<Arc<DBItem>>> {
        let query = QQuery::new(&self.name);
        Ok(self.load(&query, LoadParam::LOAD, None)?.unwrap_or_default())
    }

    /// Rows matching a SQL `WHERE` fragment.
    pub fn load_where(&self, filter: &str, param: LoadParam) -> Result<Vec<Arc<DBItem>>> {
        let query = QQuery::parse(&self.name, filter)?;
        Ok(self.load(&query, param, None)?.unwrap_or_default())
    }

    /// The row with the given primary key. The cache is checked first; the
    /// store is queried only when `param` has `LOAD`.
    pub fn load_by_id(&self, id: impl Into<Value>, param: LoadParam) -> Result<Option<Arc<DBItem>>> {
        let id = id.into();
        if let Some(item) = self.find_by_id(id.clone()) {
            return Ok(Some(item));
        }
        if id.is_null() || !param.contains(LoadParam::LOAD) {
            return Ok(None);
        }
        let primary = self.primary_key().ok_or_else(|| {
            TableDbError::Config(format!("Table '{}' has no primary key", self.name))
        })?;
        let query = QQuery::new(&self.name).and(primary.name(), Comparer::EQUAL, id.clone());
        self.load(&query, param, None)?;
        Ok(self.find_by_id(id))
    }

    /// The row with the given code, cache first.
    pub fn load_by_code(&self, code: impl Into<Value>, param: LoadParam) -> Result<Option<Arc<DBItem>>> {
        let code = code.into();
        if let Some(item) = self.find_by_code(code.clone()) {
            return Ok(Some(item));
        }
        if code.is_null() || !param.contains(LoadParam::LOAD) {
            return Ok(None);
        }
        let column = self.code_key().ok_or_else(|| {
            TableDbError::Config(format!("Table '{}' has no code column", self.name))
        })?;
        let query = QQuery::new(&self.name).and(column.name(), Comparer::EQUAL, code.clone());
        self.load(&query, param, None)?;
        Ok(self.find_by_code(code))
    }

    /// Rows of another table referencing `item` through the named referencing.
    pub fn referencing_items(
        &self,
        item: &DBItem,
        referencing: &str,
        param: LoadParam,
    ) -> Result<Vec<Arc<DBItem>>> {
        let referencing = self
            .referencing(referencing)
            .ok_or_else(|| TableDbError::not_found("referencing", referencing))?;
        let table = self.schema()?.table_or_err(&referencing.table)?;
        let id = item.primary_id();
        if param.contains(LoadParam::LOAD) {
            let query = QQuery::new(table.name()).and(&referencing.column, Comparer::EQUAL, id.clone());
            table.load(&query, param, None)?;
        }
        table.select_column(&referencing.column, Comparer::EQUAL, id)
    }
}
