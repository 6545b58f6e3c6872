use super::{DBItem, DBStatus, DBTable, LogType, TableEvent, UpdateState};
use crate::connection::{Command, DBTransaction, Dialect, ExecuteMode};
use crate::error::{Result, TableDbError};
use crate::schema::DBColumn;
use crate::value::Value;
use chrono::Utc;
use std::sync::Arc;

fn save_rank(state: UpdateState) -> u8 {
    if state.contains(UpdateState::DELETE) {
        2
    } else if state.contains(UpdateState::INSERT) {
        0
    } else {
        1
    }
}

impl DBTable {
    /// Save every pending row in a transaction of its own.
    pub fn save(&self) -> Result<usize> {
        let transaction = self.schema()?.begin()?;
        let saved = self.save_with(&transaction)?;
        transaction.commit()?;
        Ok(saved)
    }

    /// Save every pending row inside `transaction`: inserts, then updates,
    /// then deletes. Returns the number of rows written.
    pub fn save_with(&self, transaction: &DBTransaction) -> Result<usize> {
        let mut pending: Vec<_> = self
            .items()
            .into_iter()
            .filter(|item| item.is_changed())
            .collect();
        pending.sort_by_key(|item| save_rank(item.update_state()));
        let mut saved = 0;
        for item in &pending {
            if self.save_item(item, transaction)? {
                saved += 1;
            }
        }
        log::debug!("{}: saved {saved} of {} rows", self.name, pending.len());
        Ok(saved)
    }

    /// Write one row's pending change. The row is registered in the
    /// transaction and accepted only when it commits; on error its pending
    /// state is left untouched.
    pub fn save_item(&self, item: &Arc<DBItem>, transaction: &DBTransaction) -> Result<bool> {
        if let Some(base) = &self.base {
            return base.save_item(item, transaction);
        }
        let state = item.update_state();
        if !item.is_attached() && !state.contains(UpdateState::DELETE) {
            self.add(item)?;
        }
        if !state.is_pending() {
            return Ok(false);
        }
        let dialect = transaction.connection().dialect();
        let mut stamped = Vec::new();
        let (command, log_type) = if state.contains(UpdateState::DELETE) {
            (self.format_delete(item, dialect)?, LogType::Delete)
        } else if state.contains(UpdateState::INSERT) {
            self.prepare_insert(item)?;
            (self.format_insert(item, dialect), LogType::Insert)
        } else {
            if item.changed_columns().is_empty() {
                item.accept();
                return Ok(false);
            }
            stamped = self.prepare_update(item);
            (self.format_update(item, &stamped, dialect)?, LogType::Update)
        };

        self.raise(TableEvent::RowUpdating {
            table: self.name.clone(),
            item: item.clone(),
            state,
        });
        log::debug!("{}", command.text);
        transaction
            .connection()
            .execute(&command, ExecuteMode::NonQuery)
            .map_err(|e| TableDbError::Persistence(format!("{}: {e}", self.name)))?;
        for (column, value) in stamped {
            self.set_value(item, &column, value, true);
        }
        item.add_update_state(UpdateState::COMMIT);
        transaction.add_item(item);

        if self.is_logging() {
            self.write_log(item, log_type, transaction);
        }
        self.raise(TableEvent::RowUpdated {
            table: self.name.clone(),
            item: item.clone(),
            state,
        });
        Ok(true)
    }

    fn prepare_insert(&self, item: &Arc<DBItem>) -> Result<()> {
        let now = Value::DateTime(Utc::now());
        if let Some(column) = self.date_key() {
            if column.value(item.handle()).is_null() {
                self.set_value(item, &column, now.clone(), false);
            }
        }
        if let Some(column) = self.stamp_key() {
            self.set_value(item, &column, now, false);
        }
        if let Some(column) = self.status_key() {
            let status = column.value(item.handle()).as_i64().unwrap_or(0);
            if DBStatus::from_i64(status) == DBStatus::Empty {
                self.set_value(item, &column, DBStatus::New.into(), false);
            }
        }
        if let Some(column) = self.primary_key() {
            if column.value(item.handle()).is_null() {
                let id = self.generate_id()?;
                self.set_value(item, &column, Value::Int(id), false);
            }
        }
        Ok(())
    }

    /// Stamp and status values an update writes on top of the row's own
    /// changes. They reach the item only once the command has run.
    fn prepare_update(&self, item: &DBItem) -> Vec<(Arc<DBColumn>, Value)> {
        let changed = item.changed_columns();
        let mut stamped = Vec::new();
        if let Some(column) = self.stamp_key() {
            stamped.push((column, Value::DateTime(Utc::now())));
        }
        if let Some(column) = self.status_key() {
            let explicit = changed.iter().any(|c| c == column.name())
                || self
                    .access_key()
                    .is_some_and(|access| changed.iter().any(|c| c == access.name()));
            let status = column.value(item.handle()).as_i64().unwrap_or(0);
            if !explicit && DBStatus::from_i64(status) == DBStatus::New {
                stamped.push((column, DBStatus::Edit.into()));
            }
        }
        stamped
    }

    fn primary_filter(&self, item: &DBItem, dialect: &dyn Dialect) -> Result<(String, Value)> {
        let primary = self.primary_key().ok_or_else(|| {
            TableDbError::Persistence(format!("Table '{}' has no primary key", self.name))
        })?;
        let id = primary.value(item.handle());
        if id.is_null() {
            return Err(TableDbError::Persistence(format!(
                "{}: row without primary key",
                self.name
            )));
        }
        let text = format!(
            "{} = {}",
            dialect.format_column(primary.name()),
            dialect.format_parameter("id")
        );
        Ok((text, id))
    }

    fn format_insert(&self, item: &DBItem, dialect: &dyn Dialect) -> Command {
        let mut names = Vec::new();
        let mut placeholders = Vec::new();
        let mut parameters = Vec::new();
        for column in self.columns() {
            let value = column.value(item.handle());
            if value.is_null() {
                continue;
            }
            let parameter = format!("p{}", parameters.len());
            names.push(dialect.format_column(column.name()));
            placeholders.push(dialect.format_parameter(&parameter));
            parameters.push((parameter, value));
        }
        let text = format!(
            "insert into {} ({}) values ({})",
            dialect.format_table(&self.name),
            names.join(", "),
            placeholders.join(", ")
        );
        Command::with_parameters(text, parameters)
    }

    fn format_update(
        &self,
        item: &DBItem,
        stamped: &[(Arc<DBColumn>, Value)],
        dialect: &dyn Dialect,
    ) -> Result<Command> {
        let (filter, id) = self.primary_filter(item, dialect)?;
        let mut assignments = Vec::new();
        let mut parameters = Vec::new();
        let changed = item
            .changed_columns()
            .into_iter()
            .filter(|name| !stamped.iter().any(|(c, _)| c.name() == name))
            .filter_map(|name| self.column(&name))
            .map(|column| {
                let value = column.value(item.handle());
                (column, value)
            });
        for (column, value) in changed.chain(stamped.iter().cloned()) {
            let parameter = format!("p{}", parameters.len());
            assignments.push(format!(
                "{} = {}",
                dialect.format_column(column.name()),
                dialect.format_parameter(&parameter)
            ));
            parameters.push((parameter, value));
        }
        parameters.push(("id".to_string(), id));
        let text = format!(
            "update {} set {} where {filter}",
            dialect.format_table(&self.name),
            assignments.join(", ")
        );
        Ok(Command::with_parameters(text, parameters))
    }

    fn format_delete(&self, item: &DBItem, dialect: &dyn Dialect) -> Result<Command> {
        let (filter, id) = self.primary_filter(item, dialect)?;
        let text = format!("delete from {} where {filter}", dialect.format_table(&self.name));
        Ok(Command::with_parameters(text, vec![("id".to_string(), id)]))
    }
}
