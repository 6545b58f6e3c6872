use super::{DBItem, DBTable};
use crate::attribute::ColumnKeys;
use crate::connection::DBTransaction;
use crate::error::{Result, TableDbError};
use crate::query::Comparer;
use crate::value::Value;
use chrono::Utc;
use std::sync::Arc;

/// Kind of change recorded by a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum LogType {
    Insert = 1,
    Update = 2,
    Delete = 4,
}

impl LogType {
    pub fn from_i64(value: i64) -> Option<LogType> {
        match value {
            1 => Some(LogType::Insert),
            2 => Some(LogType::Update),
            4 => Some(LogType::Delete),
            _ => None,
        }
    }
}

impl From<LogType> for Value {
    fn from(log_type: LogType) -> Self {
        Value::Int(log_type as i64)
    }
}

impl DBTable {
    /// Write the log row mirroring a saved change. Failures are reported to
    /// the schema error sink and never returned.
    pub(crate) fn write_log(
        &self,
        item: &Arc<DBItem>,
        log_type: LogType,
        transaction: &DBTransaction,
    ) {
        let Some(log_table) = self.log_table() else {
            return;
        };
        if let Err(e) = self.try_write_log(&log_table, item, log_type, transaction) {
            let error = TableDbError::Persistence(format!(
                "Log row for '{}' in '{}' failed: {e}",
                self.name,
                log_table.name()
            ));
            match self.schema() {
                Ok(schema) => schema.report_error(&error),
                Err(_) => log::error!("{error}"),
            }
        }
    }

    fn try_write_log(
        &self,
        log_table: &Arc<DBTable>,
        item: &Arc<DBItem>,
        log_type: LogType,
        transaction: &DBTransaction,
    ) -> Result<()> {
        let row = log_table.new_item();
        for column in log_table.columns() {
            let value = if column.has_keys(ColumnKeys::LOG_TYPE) {
                Value::from(log_type)
            } else if column.has_keys(ColumnKeys::LOG_BASE) {
                item.primary_id()
            } else if column.has_keys(ColumnKeys::DATE) && column.base_column().is_none() {
                Value::DateTime(Utc::now())
            } else if let Some(base) = column.base_column() {
                item.get(&base)
            } else {
                continue;
            };
            log_table.set_value(&row, &column, value, false);
        }
        let sub = transaction.sub_transaction()?;
        match log_table.save_item(&row, &sub) {
            Ok(_) => sub.commit(),
            Err(e) => {
                sub.rollback()?;
                log_table.remove(&row);
                Err(e)
            }
        }
    }

    /// Log rows held in memory for one base item, oldest first.
    pub fn log_items(&self, item: &DBItem) -> Result<Vec<Arc<DBItem>>> {
        let log_table = self.log_table().ok_or_else(|| {
            TableDbError::Config(format!("Table '{}' has no log table", self.name))
        })?;
        let link = log_table
            .column_by_keys(ColumnKeys::LOG_BASE)
            .ok_or_else(|| {
                TableDbError::Config(format!("Log table '{}' has no base link", log_table.name()))
            })?;
        log_table.select_column(link.name(), Comparer::EQUAL, item.primary_id())
    }
}
