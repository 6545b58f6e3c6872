use super::{ColumnGenerator, Memo, Registry, TypeDescriptor};
use crate::attribute::{ColumnKeys, TypeMapping};
use crate::error::{Result, TableDbError};
use crate::schema::{ColumnDef, DBColumn, DBSchema};
use crate::table::{DBTable, TableKind};
use crate::value::DataType;
use std::sync::Arc;

pub const LOG_ID: &str = "log_id";
pub const LOG_TYPE: &str = "log_type";
pub const LOG_DATE: &str = "log_date";
pub const LOG_BASE_ID: &str = "base_id";

/// Keys a mirrored column never keeps: a log holds many rows per base row.
const STRIPPED: ColumnKeys = ColumnKeys::RESERVED
    .union(ColumnKeys::UNIQUE)
    .union(ColumnKeys::INDEXING)
    .union(ColumnKeys::REFERENCE)
    .union(ColumnKeys::NOT_NULL);

/// Create the column or bring the existing one in line with `def`.
fn sync_column(table: &DBTable, name: &str, mut def: ColumnDef) -> Arc<DBColumn> {
    match table.column(name) {
        Some(existing) if existing.data_type() == def.data_type => {
            existing.update(|current| {
                if def.display_name.is_none() {
                    def.display_name = current.display_name.take();
                }
                *current = def;
            });
            existing
        }
        Some(_) => table.replace_column(DBColumn::new(table.name(), name, def, table.block_size())),
        None => table.add_column(DBColumn::new(table.name(), name, def, table.block_size())),
    }
}

/// Generates the audit table mirroring a base table's loggable columns.
pub struct LogTableGenerator {
    pub type_name: String,
    pub base_type: String,
    pub name: Option<String>,
    pub extras: TypeDescriptor,
    memo: Memo,
}

impl LogTableGenerator {
    pub fn initialize(registry: &Registry, mapping: &TypeMapping) -> Result<Self> {
        let attribute = mapping.log_table.clone().ok_or_else(|| {
            TableDbError::Config(format!("Type '{}' is not a log table", mapping.name))
        })?;
        Ok(LogTableGenerator {
            type_name: mapping.name.clone(),
            base_type: attribute.base,
            name: attribute.name,
            extras: TypeDescriptor::initialize(&registry.chain(&mapping.name)?),
            memo: Memo::default(),
        })
    }

    pub fn generate(&self, registry: &Registry, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        if let Some(table) = self.memo.get(schema) {
            return Ok(table);
        }
        let base = registry.generate(&self.base_type, schema)?.storage();
        let table =
            LogTableGenerator::generate_for(&base, schema, self.name.as_deref(), &self.extras.columns)?;
        table.update_def(|def| def.type_name = Some(self.type_name.clone()));
        Ok(self.memo.insert(schema, table))
    }

    /// Create or refresh the log table of `base`, named `<base>_log` unless
    /// `name` is given, and bind the two tables to each other.
    pub fn generate_for(
        base: &Arc<DBTable>,
        schema: &Arc<DBSchema>,
        name: Option<&str>,
        extras: &[ColumnGenerator],
    ) -> Result<Arc<DBTable>> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_log", base.name()));
        let table = match schema.table(&name) {
            Some(existing) if existing.kind() == TableKind::Log => existing,
            Some(_) => {
                return Err(TableDbError::Config(format!(
                    "Table '{name}' exists and is not a log table"
                )))
            }
            None => DBTable::new(schema, &name, TableKind::Log),
        };
        let primary = base.primary_key().ok_or_else(|| {
            TableDbError::Config(format!(
                "Log table '{name}': table '{}' has no primary key",
                base.name()
            ))
        })?;

        let mut order = Vec::new();
        let bookkeeping = [
            (LOG_ID, DataType::Integer, ColumnKeys::PRIMARY),
            (LOG_TYPE, DataType::Integer, ColumnKeys::LOG_TYPE),
            (LOG_DATE, DataType::DateTime, ColumnKeys::DATE),
            (LOG_BASE_ID, primary.data_type(), ColumnKeys::LOG_BASE),
        ];
        for (column, data_type, keys) in bookkeeping {
            let mut def = ColumnDef::new(data_type, keys);
            if keys == ColumnKeys::LOG_BASE {
                def.reference_table = Some(base.name().to_string());
            }
            sync_column(&table, column, def);
            order.push(column.to_string());
        }
        for column in base.columns().iter().filter(|c| c.is_loggable()) {
            if order.iter().any(|n| n == column.name()) {
                continue;
            }
            let mut def = column.def();
            def.keys = def.keys.difference(STRIPPED);
            def.base_column = Some(column.name().to_string());
            def.reference_table = None;
            def.default = None;
            sync_column(&table, column.name(), def);
            order.push(column.name().to_string());
        }
        for column in extras {
            column.generate(&table);
        }
        LogTableGenerator::remove_deleted_columns(&table, base);
        table.reorder_columns(&order);
        table.clear_cache();
        table.refresh_indexes();
        table.check_reserved_keys()?;

        table.update_def(|def| def.log_base = Some(base.name().to_string()));
        base.update_def(|def| def.log_table = Some(name.clone()));
        let table = schema.add_table(table);
        log::debug!("Generated log table '{name}' for '{}'", base.name());
        Ok(table)
    }

    /// Drop mirrored columns whose base column was deleted or is no longer
    /// logged. Returns the dropped names.
    pub fn remove_deleted_columns(table: &DBTable, base: &DBTable) -> Vec<String> {
        let stale: Vec<String> = table
            .columns()
            .iter()
            .filter_map(|column| {
                let source = column.base_column()?;
                match base.column(&source) {
                    Some(source) if source.is_loggable() => None,
                    _ => Some(column.name().to_string()),
                }
            })
            .collect();
        for name in &stale {
            table.remove_column(name);
            log::debug!("{}: removed log column '{name}'", table.name());
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::order_mapping;
    use super::*;
    use crate::attribute::PropertyMapping;
    use pretty_assertions::assert_eq;

    fn names(table: &DBTable) -> Vec<String> {
        table.columns().iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn test_log_table_mirrors_loggable_columns() {
        let registry = Registry::new();
        registry.register(order_mapping().with_property(PropertyMapping::column(
            "secret",
            DataType::Text,
            ColumnKeys::NO_LOG,
        )));
        let schema = DBSchema::new("main");
        let orders = registry.generate("Order", &schema).unwrap();
        let log = orders.log_table().unwrap();

        assert_eq!(log.kind(), TableKind::Log);
        assert_eq!(
            names(&log),
            vec!["log_id", "log_type", "log_date", "base_id", "kind", "id", "amount", "status"]
        );
        assert_eq!(log.primary_key().unwrap().name(), LOG_ID);
        let id = log.column("id").unwrap();
        assert_eq!(id.base_column().as_deref(), Some("id"));
        assert!(!id.has_keys(ColumnKeys::PRIMARY));
        assert!(log.column("status").unwrap().index().is_none());
        assert!(log.column(LOG_BASE_ID).unwrap().index().is_some());
        assert_eq!(log.log_base().unwrap().name(), "orders");
    }

    #[test]
    fn test_deleted_base_columns_are_removed() {
        let registry = Registry::new();
        registry.register(order_mapping());
        let schema = DBSchema::new("main");
        let orders = registry.generate("Order", &schema).unwrap();
        let log = orders.log_table().unwrap();

        orders.remove_column("amount");
        orders
            .column("status")
            .unwrap()
            .update(|def| def.keys |= ColumnKeys::NO_LOG);
        let removed = LogTableGenerator::remove_deleted_columns(&log, &orders);
        assert_eq!(removed, vec!["amount".to_string(), "status".to_string()]);
        assert!(log.column("amount").is_none());
        assert!(log.column(LOG_TYPE).is_some());
    }

    #[test]
    fn test_log_type_names_its_table() {
        let registry = Registry::new();
        registry.register(order_mapping());
        registry.register(
            TypeMapping::new("OrderAudit")
                .with_log_table("Order")
                .with_property(PropertyMapping::column("user", DataType::Text, ColumnKeys::empty())),
        );
        let schema = DBSchema::new("main");
        let audit = registry.generate("OrderAudit", &schema).unwrap();
        assert_eq!(audit.name(), "orders_log");
        assert!(audit.column("user").is_some());
        assert_eq!(audit.type_name().as_deref(), Some("OrderAudit"));
    }
}
