use super::{Command, Connection, Dialect, ExecuteMode, ResultRow};
use crate::error::{Result, TableDbError};
use crate::value::{DataType, Value};
use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use rusqlite::types::Value as SqlValue;
use std::cell::Cell;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// SQLite flavor: no sequences, foreign keys only inside `create table`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn format_type(&self, data_type: DataType, _size: u32, _scale: u32) -> String {
        match data_type {
            DataType::Bool | DataType::Integer => "integer",
            DataType::Real => "real",
            DataType::Text | DataType::DateTime => "text",
            DataType::Blob => "blob",
        }
        .to_string()
    }

    fn inline_foreign_keys(&self) -> bool {
        true
    }

    fn supports_sequences(&self) -> bool {
        false
    }
}

struct SqliteInner {
    conn: rusqlite::Connection,
    depth: Cell<usize>,
}

/// The reference backend over a single rusqlite connection.
///
/// The lock is reentrant so a reader callback may issue nested queries on the
/// same thread. An open transaction belongs to the thread that began it:
/// nested `begin` calls from that thread become savepoints, while other
/// threads block in `begin`, `execute` and `read` until the outermost
/// transaction commits or rolls back.
pub struct SqliteConnection {
    inner: ReentrantMutex<SqliteInner>,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    dialect: SqliteDialect,
}

impl SqliteConnection {
    /// Open or create the database file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(SqliteConnection::wrap(conn))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(SqliteConnection::wrap(conn))
    }

    fn wrap(conn: rusqlite::Connection) -> Self {
        SqliteConnection {
            inner: ReentrantMutex::new(SqliteInner {
                conn,
                depth: Cell::new(0),
            }),
            owner: Mutex::new(None),
            released: Condvar::new(),
            dialect: SqliteDialect,
        }
    }

    /// Block while another thread holds an open transaction.
    fn wait_turn(&self) -> MutexGuard<'_, Option<ThreadId>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        while owner.is_some_and(|id| id != me) {
            self.released.wait(&mut owner);
        }
        owner
    }

    fn claim(&self) {
        *self.wait_turn() = Some(thread::current().id());
    }

    fn release(&self) {
        *self.owner.lock() = None;
        self.released.notify_all();
    }

    /// Run several statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.wait_turn();
        self.inner.lock().conn.execute_batch(sql)?;
        Ok(())
    }

    /// Current transaction nesting depth.
    pub fn depth(&self) -> usize {
        self.inner.lock().depth.get()
    }

    fn prepare<'c>(
        conn: &'c rusqlite::Connection,
        command: &Command,
    ) -> Result<rusqlite::Statement<'c>> {
        let mut stmt = conn
            .prepare(&command.text)
            .map_err(|e| TableDbError::Query(format!("Failed to prepare '{}': {e}", command.text)))?;
        for (name, value) in &command.parameters {
            // Bindings whose placeholder was not rendered are skipped.
            if let Some(index) = stmt.parameter_index(&format!(":{name}"))? {
                stmt.raw_bind_parameter(index, to_sql(value))?;
            }
        }
        Ok(stmt)
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&self, command: &Command, mode: ExecuteMode) -> Result<Value> {
        self.wait_turn();
        let inner = self.inner.lock();
        let mut stmt = SqliteConnection::prepare(&inner.conn, command)?;
        match mode {
            ExecuteMode::NonQuery => {
                let affected = stmt.raw_execute()?;
                Ok(Value::Int(affected as i64))
            }
            ExecuteMode::Scalar => {
                let mut rows = stmt.raw_query();
                let value = match rows.next()? {
                    Some(row) => from_sql(row.get::<_, SqlValue>(0)?),
                    None => Value::Null,
                };
                Ok(value)
            }
        }
    }

    fn read(
        &self,
        command: &Command,
        visitor: &mut dyn FnMut(&ResultRow) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        self.wait_turn();
        let inner = self.inner.lock();
        let mut stmt = SqliteConnection::prepare(&inner.conn, command)?;
        let columns: Arc<Vec<String>> = Arc::new(
            stmt.column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let count = columns.len();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(from_sql(row.get::<_, SqlValue>(i)?));
            }
            let row = ResultRow::new(columns.clone(), values);
            if visitor(&row)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        self.claim();
        let inner = self.inner.lock();
        let depth = inner.depth.get();
        let sql = if depth == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT sp{depth}")
        };
        if let Err(e) = inner.conn.execute_batch(&sql) {
            drop(inner);
            if depth == 0 {
                self.release();
            }
            return Err(e.into());
        }
        inner.depth.set(depth + 1);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let inner = self.inner.lock();
        let depth = match inner.depth.get() {
            0 => return Err(TableDbError::Persistence("No active transaction".into())),
            d => d - 1,
        };
        if depth > 0 {
            inner.conn.execute_batch(&format!("RELEASE sp{depth}"))?;
            inner.depth.set(depth);
            return Ok(());
        }
        // A failed outermost commit ends the transaction as a rollback.
        let result = inner.conn.execute_batch("COMMIT");
        if result.is_err() && !inner.conn.is_autocommit() {
            if let Err(e) = inner.conn.execute_batch("ROLLBACK") {
                log::error!("Rollback after failed commit failed: {e}");
            }
        }
        inner.depth.set(0);
        drop(inner);
        self.release();
        result.map_err(TableDbError::from)
    }

    fn rollback(&self) -> Result<()> {
        let inner = self.inner.lock();
        let depth = match inner.depth.get() {
            0 => return Err(TableDbError::Persistence("No active transaction".into())),
            d => d - 1,
        };
        // Depth is released first so a failed rollback never leaves it dangling.
        inner.depth.set(depth);
        if depth > 0 {
            inner
                .conn
                .execute_batch(&format!("ROLLBACK TO sp{depth}; RELEASE sp{depth}"))?;
            return Ok(());
        }
        let result = inner.conn.execute_batch("ROLLBACK");
        drop(inner);
        self.release();
        result.map_err(TableDbError::from)
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
        Value::DateTime(d) => SqlValue::Text(d.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Int(n),
        SqlValue::Real(f) => Value::Real(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Blob(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_with_table() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("create table items (id integer primary key, name text, amount real)")
            .unwrap();
        conn
    }

    fn insert(conn: &SqliteConnection, id: i64, name: &str) {
        let command = Command::new("insert into items (id, name) values (:id, :name)")
            .bind("id", id)
            .bind("name", name);
        conn.execute(&command, ExecuteMode::NonQuery).unwrap();
    }

    fn count(conn: &SqliteConnection) -> i64 {
        conn.execute(&Command::new("select count(*) from items"), ExecuteMode::Scalar)
            .unwrap()
            .as_i64()
            .unwrap()
    }

    #[test]
    fn test_execute_and_read() {
        let conn = open_with_table();
        insert(&conn, 1, "alpha");
        insert(&conn, 2, "beta");

        let mut names = Vec::new();
        conn.read(
            &Command::new("select id, name from items order by id"),
            &mut |row| {
                names.push(row.get("name").cloned().unwrap_or_default());
                Ok(ControlFlow::Continue(()))
            },
        )
        .unwrap();
        assert_eq!(names, vec![Value::from("alpha"), Value::from("beta")]);
    }

    #[test]
    fn test_read_stops_on_break() {
        let conn = open_with_table();
        insert(&conn, 1, "alpha");
        insert(&conn, 2, "beta");

        let mut seen = 0;
        conn.read(&Command::new("select * from items"), &mut |_| {
            seen += 1;
            Ok(ControlFlow::Break(()))
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_unrendered_binding_is_ignored() {
        let conn = open_with_table();
        insert(&conn, 1, "alpha");
        let command = Command::new("select name from items where id = :p0")
            .bind("p0", 1)
            .bind("p1", "unused");
        let value = conn.execute(&command, ExecuteMode::Scalar).unwrap();
        assert_eq!(value, Value::from("alpha"));
    }

    #[test]
    fn test_transaction_commit() {
        let conn = open_with_table();
        conn.begin().unwrap();
        insert(&conn, 1, "alpha");
        conn.commit().unwrap();
        assert_eq!(count(&conn), 1);
        assert_eq!(conn.depth(), 0);
    }

    #[test]
    fn test_transaction_rollback() {
        let conn = open_with_table();
        conn.begin().unwrap();
        insert(&conn, 1, "alpha");
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_nested_rollback_keeps_outer_work() {
        let conn = open_with_table();
        conn.begin().unwrap();
        insert(&conn, 1, "alpha");
        conn.begin().unwrap();
        insert(&conn, 2, "beta");
        conn.rollback().unwrap();
        conn.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_other_thread_waits_for_open_transaction() {
        let conn = Arc::new(open_with_table());
        conn.begin().unwrap();
        insert(&conn, 1, "alpha");

        let (done, finished) = std::sync::mpsc::channel();
        let worker = {
            let conn = conn.clone();
            thread::spawn(move || {
                conn.begin().unwrap();
                insert(&conn, 2, "beta");
                conn.commit().unwrap();
                done.send(()).unwrap();
            })
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(finished.try_recv().is_err());
        assert_eq!(conn.depth(), 1);

        conn.rollback().unwrap();
        worker.join().unwrap();
        let name = conn
            .execute(&Command::new("select name from items"), ExecuteMode::Scalar)
            .unwrap();
        assert_eq!(name, Value::from("beta"));
        assert_eq!(count(&conn), 1);
        assert_eq!(conn.depth(), 0);
    }

    #[test]
    fn test_commit_without_transaction_fails() {
        let conn = open_with_table();
        assert!(conn.commit().is_err());
    }

    #[test]
    fn test_datetime_round_trips_as_text() {
        let conn = open_with_table();
        let now = chrono::Utc::now();
        let command = Command::new("select :d").bind("d", now);
        let value = conn.execute(&command, ExecuteMode::Scalar).unwrap();
        let parsed = value.coerce(DataType::DateTime).as_datetime().unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
