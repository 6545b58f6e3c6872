use crate::connection::Dialect;
use crate::error::Result;
use parking_lot::{Mutex, RwLock};

/// Named container grouping related tables of a schema.
#[derive(Debug)]
pub struct DBTableGroup {
    pub name: String,
    tables: RwLock<Vec<String>>,
}

impl DBTableGroup {
    pub fn new(name: &str) -> Self {
        DBTableGroup {
            name: name.to_string(),
            tables: RwLock::new(Vec::new()),
        }
    }

    pub fn add_table(&self, table: &str) {
        let mut tables = self.tables.write();
        if !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }

    pub fn tables(&self) -> Vec<String> {
        self.tables.read().clone()
    }
}

/// Named group of columns within one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBColumnGroup {
    pub name: String,
    pub order: usize,
}

/// Inverse side of a foreign key: the rows of `table` whose `column`
/// references the owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBReferencing {
    pub name: String,
    pub table: String,
    pub column: String,
}

/// Per-table identifier generator.
#[derive(Debug)]
pub struct DBSequence {
    pub name: String,
    current: Mutex<Option<i64>>,
}

impl DBSequence {
    pub fn new(name: &str) -> Self {
        DBSequence {
            name: name.to_string(),
            current: Mutex::new(None),
        }
    }

    /// Next value. On first use the sequence starts after the value returned
    /// by `seed`.
    pub fn next(&self, seed: impl FnOnce() -> Result<i64>) -> Result<i64> {
        let mut current = self.current.lock();
        let value = match *current {
            Some(value) => value + 1,
            None => seed()? + 1,
        };
        *current = Some(value);
        Ok(value)
    }

    pub fn current(&self) -> Option<i64> {
        *self.current.lock()
    }

    pub fn format_create(&self, dialect: &dyn Dialect) -> String {
        format!("create sequence {}", dialect.format_table(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_seeds_once() {
        let sequence = DBSequence::new("orders_seq");
        let mut seeded = 0;
        let mut seed = || {
            seeded += 1;
            Ok(41)
        };
        assert_eq!(sequence.next(&mut seed).unwrap(), 42);
        assert_eq!(sequence.next(&mut seed).unwrap(), 43);
        assert_eq!(seeded, 1);
        assert_eq!(sequence.current(), Some(43));
    }

    #[test]
    fn test_group_deduplicates_tables() {
        let group = DBTableGroup::new("sales");
        group.add_table("orders");
        group.add_table("orders");
        assert_eq!(group.tables(), vec!["orders".to_string()]);
    }
}
