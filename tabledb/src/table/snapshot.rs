//! Binary table snapshots.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! "TDBS" | version u16 | rows u32 | schema flag u8
//! [schema: columns u16 { name str, type u8 } | item types u16 { index i32, name str }]
//! rows × { item type i32, columns × { tag u8, payload } }
//! ```
//!
//! Strings are a `u32` byte length followed by UTF-8. A value tag is `0` for
//! null, otherwise the [`DataType::tag`] of the payload.

use super::{DBItem, DBTable, TableEvent};
use crate::attribute::ColumnKeys;
use crate::error::{Result, TableDbError};
use crate::schema::{ColumnDef, DBColumn};
use crate::value::{DataType, Value};
use chrono::DateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"TDBS";
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotColumn {
    pub name: String,
    pub data_type: DataType,
}

/// Leading part of a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotHeader {
    pub version: u16,
    pub rows: u32,
    /// Empty when the file was written without a schema block.
    pub columns: Vec<SnapshotColumn>,
    pub item_types: BTreeMap<i32, String>,
}

impl SnapshotHeader {
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(TableDbError::Snapshot("not a table snapshot".into()));
        }
        let version = read_u16(reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(TableDbError::Snapshot(format!("unsupported version {version}")));
        }
        let rows = read_u32(reader)?;
        let mut header = SnapshotHeader {
            version,
            rows,
            columns: Vec::new(),
            item_types: BTreeMap::new(),
        };
        if read_u8(reader)? != 0 {
            for _ in 0..read_u16(reader)? {
                let name = read_str(reader)?;
                let tag = read_u8(reader)?;
                let data_type = DataType::from_tag(tag)
                    .ok_or_else(|| TableDbError::Snapshot(format!("unknown type tag {tag}")))?;
                header.columns.push(SnapshotColumn { name, data_type });
            }
            for _ in 0..read_u16(reader)? {
                let index = read_i32(reader)?;
                header.item_types.insert(index, read_str(reader)?);
            }
        }
        Ok(header)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        SnapshotHeader::read(&mut BufReader::new(File::open(path)?))
    }
}

impl DBTable {
    /// Write every row to a snapshot file with a schema block.
    pub fn save_file(&self, path: &Path) -> Result<usize> {
        let mut writer = BufWriter::new(File::create(path)?);
        let count = self.write_snapshot(&mut writer, true)?;
        writer.flush()?;
        log::debug!("{}: wrote {count} rows to {}", self.name, path.display());
        Ok(count)
    }

    pub fn write_snapshot(&self, writer: &mut impl Write, with_schema: bool) -> Result<usize> {
        let columns = self.columns();
        let items = self.items();
        let rows = u32::try_from(items.len())
            .map_err(|_| TableDbError::Snapshot("too many rows".into()))?;
        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&rows.to_le_bytes())?;
        writer.write_all(&[u8::from(with_schema)])?;
        if with_schema {
            write_len16(writer, columns.len())?;
            for column in &columns {
                write_str(writer, column.name())?;
                writer.write_all(&[column.data_type().tag()])?;
            }
            let item_types = self.item_types();
            write_len16(writer, item_types.len())?;
            for (index, name) in &item_types {
                writer.write_all(&index.to_le_bytes())?;
                write_str(writer, name)?;
            }
        }
        for item in &items {
            writer.write_all(&item.item_type().to_le_bytes())?;
            for column in &columns {
                write_value(writer, &column.value(item.handle()))?;
            }
        }
        Ok(items.len())
    }

    /// Read a snapshot file into the table. Rows are matched by primary key
    /// like a load: cached rows with pending changes are left alone.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Arc<DBItem>>> {
        let items = self.read_snapshot(&mut BufReader::new(File::open(path)?))?;
        log::debug!("{}: read {} rows from {}", self.name, items.len(), path.display());
        Ok(items)
    }

    pub fn read_snapshot(&self, reader: &mut impl Read) -> Result<Vec<Arc<DBItem>>> {
        let storage = self.storage_ref();
        let _guard = storage.load_lock.lock();
        let header = SnapshotHeader::read(reader)?;
        let columns = if header.columns.is_empty() {
            storage.columns()
        } else {
            storage.snapshot_columns(&header.columns)
        };
        for (index, name) in &header.item_types {
            storage.register_item_type(name, Some(*index));
        }
        let primary = storage.primary_key();
        let mut items = Vec::with_capacity(header.rows as usize);
        for _ in 0..header.rows {
            let item_type = read_i32(reader)?;
            let mut values = Vec::with_capacity(columns.len());
            for _ in 0..columns.len() {
                values.push(read_value(reader)?);
            }
            let existing = primary.as_ref().and_then(|primary| {
                columns
                    .iter()
                    .position(|c| Arc::ptr_eq(c, primary))
                    .and_then(|i| storage.find_by_id(values[i].clone()))
            });
            let item = match existing {
                Some(item) if item.is_changed() => item,
                Some(item) => {
                    storage.apply_values(&item, &columns, values, item_type);
                    item
                }
                None => {
                    let item = storage.new_loaded_item();
                    storage.apply_values(&item, &columns, values, item_type);
                    storage.add(&item)?;
                    item
                }
            };
            items.push(item);
        }
        Ok(items)
    }

    fn apply_values(&self, item: &Arc<DBItem>, columns: &[Arc<DBColumn>], values: Vec<Value>, item_type: i32) {
        for (column, value) in columns.iter().zip(values) {
            self.set_value(item, column, value, false);
        }
        if item_type != 0 {
            item.set_item_type(item_type);
        }
    }

    /// Columns named by a schema block, creating the missing ones.
    fn snapshot_columns(&self, declared: &[SnapshotColumn]) -> Vec<Arc<DBColumn>> {
        let mut added = Vec::new();
        let columns = declared
            .iter()
            .map(|c| {
                self.column(&c.name).unwrap_or_else(|| {
                    added.push(c.name.clone());
                    let def = ColumnDef::new(c.data_type, ColumnKeys::empty());
                    self.add_column(DBColumn::new(&self.name, &c.name, def, self.block_size()))
                })
            })
            .collect();
        if !added.is_empty() {
            self.raise(TableEvent::LoadColumns {
                table: self.name.clone(),
                columns: added,
            });
        }
        columns
    }
}

fn write_len16(writer: &mut impl Write, len: usize) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| TableDbError::Snapshot("schema block too large".into()))?;
    writer.write_all(&len.to_le_bytes())?;
    Ok(())
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| TableDbError::Snapshot("value too large".into()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn write_str(writer: &mut impl Write, s: &str) -> Result<()> {
    write_bytes(writer, s.as_bytes())
}

fn write_value(writer: &mut impl Write, value: &Value) -> Result<()> {
    if value.is_null() {
        writer.write_all(&[0])?;
        return Ok(());
    }
    writer.write_all(&[value.data_type().tag()])?;
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_all(&[u8::from(*b)])?,
        Value::Int(n) => writer.write_all(&n.to_le_bytes())?,
        Value::Real(f) => writer.write_all(&f.to_le_bytes())?,
        Value::Text(s) => write_str(writer, s)?,
        Value::Blob(b) => write_bytes(writer, b)?,
        Value::DateTime(d) => writer.write_all(&d.timestamp_micros().to_le_bytes())?,
    }
    Ok(())
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u8(reader: &mut impl Read) -> Result<u8> {
    Ok(read_array::<1>(reader)?[0])
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(reader)?))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_i32(reader: &mut impl Read) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}

fn read_bytes(reader: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_str(reader: &mut impl Read) -> Result<String> {
    String::from_utf8(read_bytes(reader)?).map_err(|e| TableDbError::Snapshot(e.to_string()))
}

fn read_value(reader: &mut impl Read) -> Result<Value> {
    let tag = read_u8(reader)?;
    if tag == 0 {
        return Ok(Value::Null);
    }
    let data_type =
        DataType::from_tag(tag).ok_or_else(|| TableDbError::Snapshot(format!("unknown value tag {tag}")))?;
    Ok(match data_type {
        DataType::Bool => Value::Bool(read_u8(reader)? != 0),
        DataType::Integer => Value::Int(i64::from_le_bytes(read_array(reader)?)),
        DataType::Real => Value::Real(f64::from_le_bytes(read_array(reader)?)),
        DataType::Text => Value::Text(read_str(reader)?),
        DataType::Blob => Value::Blob(read_bytes(reader)?),
        DataType::DateTime => {
            let micros = i64::from_le_bytes(read_array(reader)?);
            let value = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| TableDbError::Snapshot(format!("invalid timestamp {micros}")))?;
            Value::DateTime(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::orders_table;
    use super::*;
    use pretty_assertions::assert_eq;

    fn fill(table: &Arc<DBTable>) {
        for (id, status) in [(1, Some("New")), (2, None)] {
            let item = table.new_item();
            item.set("id", id).unwrap();
            item.set("status", status).unwrap();
            item.set("amount", 2.5 * f64::from(id)).unwrap();
            item.set("stamp", "2026-03-04 05:06:07").unwrap();
            table.add(&item).unwrap();
        }
    }

    #[test]
    fn test_header_describes_file() {
        let (_schema, table) = orders_table();
        table.register_item_type("Invoice", None);
        fill(&table);
        let mut buf = Vec::new();
        assert_eq!(table.write_snapshot(&mut buf, true).unwrap(), 2);
        assert_eq!(&buf[..4], b"TDBS");

        let header = SnapshotHeader::read(&mut buf.as_slice()).unwrap();
        assert_eq!(header.rows, 2);
        assert_eq!(
            header.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["id", "status", "amount", "stamp"]
        );
        assert_eq!(header.columns[3].data_type, DataType::DateTime);
        assert_eq!(header.item_types.get(&1).map(String::as_str), Some("Invoice"));
    }

    #[test]
    fn test_file_restores_rows_into_fresh_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.tdbs");
        let (_schema, table) = orders_table();
        fill(&table);
        table.save_file(&path).unwrap();

        let (_schema2, fresh) = orders_table();
        let items = fresh.load_file(&path).unwrap();
        assert_eq!(items.len(), 2);
        for item in table.items() {
            let restored = fresh.find_by_id(item.primary_id()).unwrap();
            assert_eq!(restored.values(), item.values());
            assert!(!restored.is_changed());
        }
    }

    #[test]
    fn test_rows_without_schema_block_use_table_columns() {
        let (_schema, table) = orders_table();
        fill(&table);
        let mut buf = Vec::new();
        table.write_snapshot(&mut buf, false).unwrap();

        let (_schema2, fresh) = orders_table();
        fresh.read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(fresh.find_by_id(2).unwrap().get("amount"), Value::Real(5.0));
    }

    #[test]
    fn test_rejects_foreign_files() {
        let err = SnapshotHeader::read(&mut b"NOPE\x01\x00".as_slice()).unwrap_err();
        assert!(matches!(err, TableDbError::Snapshot(_)));
    }
}
