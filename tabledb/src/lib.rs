//! TableDB: an attribute-driven ORM engine.
//!
//! Type mappings are turned into tables, columns, indexes, foreign keys,
//! virtual tables and log tables by the [`generator`] layer. Each
//! [`DBTable`] caches its rows in columnar storage, keeps secondary indexes,
//! loads from and saves to a [`Connection`], and feeds live [`DBTableView`]s.

pub mod attribute;
pub mod config;
pub mod connection;
pub mod error;
pub mod generator;
pub mod query;
pub mod schema;
pub mod storage;
pub mod table;
pub mod value;
pub mod view;

pub use attribute::{ColumnKeys, Entity, TableKeys, TypeMapping};
pub use config::{parse_mapping, parse_mapping_str, MappingFile, SchemaConfig};
pub use connection::{Connection, DBTransaction, SqliteConnection};
pub use error::{Result, TableDbError};
pub use generator::Registry;
pub use query::{Comparer, Logic, QQuery, QueryParameters};
pub use schema::{DBColumn, DBSchema};
pub use table::{DBItem, DBStatus, DBTable, LoadParam, LogType, Table, TableEvent, UpdateState};
pub use value::{DataType, Value};
pub use view::{DBTableView, ViewMode};
