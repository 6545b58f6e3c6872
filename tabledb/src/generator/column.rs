use crate::attribute::{ColumnAttribute, ColumnKeys, PropertyMapping};
use crate::schema::{ColumnDef, DBColumn};
use crate::table::DBTable;
use crate::value::DataType;
use std::sync::Arc;

/// Blueprint of one column, taken from a property's column attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnGenerator {
    pub name: String,
    pub property: String,
    pub data_type: DataType,
    pub attribute: ColumnAttribute,
}

impl ColumnGenerator {
    pub fn from_property(property: &PropertyMapping) -> Option<Self> {
        let attribute = property.column.clone()?;
        Some(ColumnGenerator {
            name: attribute.name.clone(),
            property: property.name.clone(),
            data_type: property.data_type,
            attribute,
        })
    }

    pub(crate) fn rank(&self) -> u8 {
        if self.attribute.keys.contains(ColumnKeys::ITEM_TYPE) {
            0
        } else if self.attribute.keys.contains(ColumnKeys::PRIMARY) {
            1
        } else {
            2
        }
    }

    fn sync(&self, def: &mut ColumnDef) {
        def.size = self.attribute.size;
        def.scale = self.attribute.scale;
        def.keys = self.attribute.keys;
        def.culture = self.attribute.culture.clone();
        def.group = self.attribute.group.clone();
        def.property = Some(self.property.clone());
        def.default = self.attribute.default_value(self.data_type);
        if def.display_name.is_none() {
            def.display_name = Some(self.property.clone());
        }
    }

    /// Create the column or refresh the existing one of the same name. A
    /// column whose data type drifted is replaced, carrying its values over.
    pub fn generate(&self, table: &DBTable) -> Arc<DBColumn> {
        match table.column(&self.name) {
            Some(existing) if existing.data_type() != self.data_type => {
                log::debug!(
                    "{}.{}: type changed from {:?} to {:?}",
                    table.name(),
                    self.name,
                    existing.data_type(),
                    self.data_type
                );
                let mut def = existing.def();
                def.data_type = self.data_type;
                self.sync(&mut def);
                table.replace_column(DBColumn::new(
                    table.name(),
                    &self.name,
                    def,
                    table.block_size(),
                ))
            }
            Some(existing) => {
                existing.update(|def| self.sync(def));
                if existing.ensure_index().is_some() {
                    table.index_column(&existing);
                }
                table.clear_cache();
                existing
            }
            None => {
                let mut def = ColumnDef::new(self.data_type, self.attribute.keys);
                self.sync(&mut def);
                table.add_column(DBColumn::new(
                    table.name(),
                    &self.name,
                    def,
                    table.block_size(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::orders_table;
    use crate::value::Value;

    fn generator(name: &str, data_type: DataType, keys: ColumnKeys) -> ColumnGenerator {
        ColumnGenerator::from_property(&PropertyMapping::column(name, data_type, keys)).unwrap()
    }

    #[test]
    fn test_generate_refreshes_in_place() {
        let (_schema, table) = orders_table();
        let before = table.column("status").unwrap();
        let mut status = generator("status", DataType::Text, ColumnKeys::INDEXING);
        status.attribute.size = 20;
        let after = status.generate(&table);
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.def().size, 20);
        assert_eq!(after.display_name(), "status");
    }

    #[test]
    fn test_custom_display_name_is_kept() {
        let (_schema, table) = orders_table();
        table
            .column("amount")
            .unwrap()
            .update(|def| def.display_name = Some("Total".into()));
        generator("amount", DataType::Real, ColumnKeys::empty()).generate(&table);
        assert_eq!(table.column("amount").unwrap().display_name(), "Total");
    }

    #[test]
    fn test_type_drift_replaces_column() {
        let (_schema, table) = orders_table();
        let item = table.new_item();
        item.set("id", 1).unwrap();
        item.set("amount", 12.0).unwrap();
        table.add(&item).unwrap();

        let before = table.column("amount").unwrap();
        let after = generator("amount", DataType::Text, ColumnKeys::empty()).generate(&table);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.data_type(), DataType::Text);
        assert_eq!(item.get("amount"), Value::Text("12".into()));
        assert_eq!(table.columns().len(), 4);
    }

    #[test]
    fn test_rank() {
        assert_eq!(generator("t", DataType::Integer, ColumnKeys::ITEM_TYPE).rank(), 0);
        assert_eq!(generator("i", DataType::Integer, ColumnKeys::PRIMARY).rank(), 1);
        assert_eq!(generator("x", DataType::Text, ColumnKeys::empty()).rank(), 2);
    }
}
