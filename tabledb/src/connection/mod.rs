//! The SQL execution capability the table engine runs against.
//!
//! The engine never builds vendor-specific SQL beyond generic
//! `select/insert/update/delete` skeletons. Quoting, parameter placeholders and
//! column types come from a [`Dialect`]; execution goes through a
//! [`Connection`].

mod sqlite;
mod transaction;

pub use sqlite::{SqliteConnection, SqliteDialect};
pub use transaction::{CancelToken, DBTransaction};

use crate::error::Result;
use crate::value::{DataType, Value};
use std::ops::ControlFlow;
use std::sync::Arc;

/// Vendor-specific formatting of SQL fragments.
pub trait Dialect: Send + Sync {
    fn format_table(&self, name: &str) -> String {
        quote(name)
    }

    fn format_column(&self, name: &str) -> String {
        quote(name)
    }

    /// Placeholder text for a named parameter.
    fn format_parameter(&self, name: &str) -> String {
        format!(":{name}")
    }

    fn format_type(&self, data_type: DataType, size: u32, scale: u32) -> String {
        match data_type {
            DataType::Bool => "boolean".to_string(),
            DataType::Integer => "bigint".to_string(),
            DataType::Real if size > 0 => format!("numeric({size},{scale})"),
            DataType::Real => "double precision".to_string(),
            DataType::Text if size > 0 => format!("varchar({size})"),
            DataType::Text => "text".to_string(),
            DataType::Blob => "blob".to_string(),
            DataType::DateTime => "timestamp".to_string(),
        }
    }

    /// Whether foreign keys must be declared inside `create table`.
    fn inline_foreign_keys(&self) -> bool {
        false
    }

    fn supports_sequences(&self) -> bool {
        true
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// ANSI-flavored dialect used when no backend-specific one applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {}

/// A SQL text with named parameter bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<(String, Value)>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(text: impl Into<String>, parameters: Vec<(String, Value)>) -> Self {
        Command {
            text: text.into(),
            parameters,
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMode {
    /// First column of the first row, `Null` when there is none.
    Scalar,
    /// Number of affected rows.
    NonQuery,
}

/// One row of a result cursor.
#[derive(Debug, Clone)]
pub struct ResultRow {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        ResultRow { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
}

/// Abstract "execute query / create command" capability.
pub trait Connection: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;

    fn create_command(&self, text: &str) -> Command {
        Command::new(text)
    }

    fn execute(&self, command: &Command, mode: ExecuteMode) -> Result<Value>;

    /// Run a query and feed each row to `visitor` until it breaks or the rows
    /// are exhausted.
    fn read(
        &self,
        command: &Command,
        visitor: &mut dyn FnMut(&ResultRow) -> Result<ControlFlow<()>>,
    ) -> Result<()>;

    /// Start a transaction, or a nested savepoint when one is already open.
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_dialect_formatting() {
        let dialect = GenericDialect;
        assert_eq!(dialect.format_table("orders"), "\"orders\"");
        assert_eq!(dialect.format_column("a\"b"), "\"a\"\"b\"");
        assert_eq!(dialect.format_parameter("p0"), ":p0");
        assert_eq!(dialect.format_type(DataType::Text, 40, 0), "varchar(40)");
        assert_eq!(dialect.format_type(DataType::Real, 12, 2), "numeric(12,2)");
    }

    #[test]
    fn test_result_row_lookup() {
        let row = ResultRow::new(
            Arc::new(vec!["id".to_string(), "Status".to_string()]),
            vec![Value::Int(1), Value::from("Paid")],
        );
        assert_eq!(row.get("status"), Some(&Value::from("Paid")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.value(7), &Value::Null);
    }
}
