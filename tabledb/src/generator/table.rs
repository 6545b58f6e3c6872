use super::{LogTableGenerator, Memo, Registry, TypeDescriptor};
use crate::attribute::TableAttribute;
use crate::error::{Result, TableDbError};
use crate::schema::{DBColumnGroup, DBSchema};
use crate::table::{DBTable, TableKind};
use std::sync::Arc;

/// Generates the physical table of a type carrying a table attribute.
pub struct TableGenerator {
    pub type_name: String,
    pub attribute: TableAttribute,
    pub descriptor: TypeDescriptor,
    memo: Memo,
}

impl TableGenerator {
    pub fn initialize(registry: &Registry, type_name: &str) -> Result<Self> {
        let chain = registry.chain(type_name)?;
        let attribute = chain
            .iter()
            .rev()
            .find_map(|m| m.table.clone())
            .ok_or_else(|| {
                TableDbError::Config(format!("Type '{type_name}' has no table attribute"))
            })?;
        Ok(TableGenerator {
            type_name: type_name.to_string(),
            attribute,
            descriptor: TypeDescriptor::initialize(&chain),
            memo: Memo::default(),
        })
    }

    pub fn generate(&self, registry: &Registry, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        if let Some(table) = self.memo.get(schema) {
            return Ok(table);
        }
        let name = &self.attribute.name;
        let table = schema
            .table(name)
            .unwrap_or_else(|| DBTable::new(schema, name, TableKind::Table));
        if let Some(group) = &self.attribute.group {
            schema.get_or_create_group(group).add_table(name);
        }
        table.update_def(|def| {
            def.keys = self.attribute.keys;
            def.type_name = Some(self.type_name.clone());
            def.sequence = self.attribute.sequence.clone();
            def.group = self.attribute.group.clone();
        });
        if let Some(size) = self.attribute.block_size {
            table.set_block_size(size);
        }

        for column in &self.descriptor.columns {
            column.generate(&table);
        }
        let order: Vec<String> = self.descriptor.columns.iter().map(|c| c.name.clone()).collect();
        table.reorder_columns(&order);
        let mut groups: Vec<&str> = Vec::new();
        for column in &self.descriptor.columns {
            if let Some(group) = column.attribute.group.as_deref() {
                if !groups.contains(&group) {
                    groups.push(group);
                    table.set_column_group(DBColumnGroup {
                        name: group.to_string(),
                        order: groups.len() - 1,
                    });
                }
            }
        }
        table.check_reserved_keys()?;
        if table.item_type_key().is_some() {
            table.register_item_type(&self.type_name, Some(0));
        }

        // Registered before references resolve so that mutual references
        // find this table instead of generating it again.
        let table = self.memo.insert(schema, schema.add_table(table));
        log::debug!("Generated table '{}' for type '{}'", name, self.type_name);

        let targets = self
            .descriptor
            .references
            .iter()
            .map(|reference| reference.resolve(registry, schema))
            .collect::<Result<Vec<_>>>()?;
        for (reference, target) in self.descriptor.references.iter().zip(&targets) {
            reference.generate(&table, target)?;
        }
        for index in &self.descriptor.indexes {
            index.generate(&table);
        }
        for referencing in &self.descriptor.referencings {
            referencing.generate(registry, &table, schema)?;
        }
        if self.attribute.log {
            LogTableGenerator::generate_for(&table, schema, None, &[])?;
        }
        for subtype in registry.item_subtypes(&self.type_name) {
            registry.generate(&subtype, schema)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::order_mapping;
    use super::*;
    use crate::attribute::{ColumnAttribute, ColumnKeys, PropertyMapping, TypeMapping};
    use crate::value::DataType;

    #[test]
    fn test_table_settings_are_applied() {
        let registry = Registry::new();
        let mut mapping = order_mapping();
        if let Some(table) = mapping.table.as_mut() {
            table.block_size = Some(100);
            table.group = Some("sales".into());
            table.sequence = Some("orders_seq".into());
        }
        registry.register(mapping.with_property(
            PropertyMapping::new("note", DataType::Text)
                .with_column(ColumnAttribute::new("note").with_group("details")),
        ));
        let schema = DBSchema::new("main");
        let table = registry.generate("Order", &schema).unwrap();

        assert_eq!(table.block_size(), 128);
        assert_eq!(schema.group("sales").unwrap().tables(), vec!["orders".to_string()]);
        assert_eq!(table.sequence_name().as_deref(), Some("orders_seq"));
        assert_eq!(table.column_groups()[0].name, "details");
        assert_eq!(table.item_types().get(&0).map(String::as_str), Some("Order"));
        assert_eq!(table.log_table_name().as_deref(), Some("orders_log"));
    }

    #[test]
    fn test_duplicate_reserved_role_fails() {
        let registry = Registry::new();
        registry.register(order_mapping().with_property(PropertyMapping::column(
            "id2",
            DataType::Integer,
            ColumnKeys::PRIMARY,
        )));
        let err = registry.generate("Order", &DBSchema::new("main")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_inherited_table_attribute() {
        let registry = Registry::new();
        registry.register(order_mapping());
        let err = TableGenerator::initialize(&registry, "Nothing");
        assert!(err.is_err());
        registry.register(TypeMapping::new("Plain"));
        assert!(TableGenerator::initialize(&registry, "Plain")
            .err()
            .is_some_and(|e| e.is_config()));
    }
}
