use super::{LogTableGenerator, Memo, Registry, TypeDescriptor};
use crate::attribute::{ItemTypeAttribute, TypeMapping, VirtualTableAttribute};
use crate::error::{Result, TableDbError};
use crate::query::{Comparer, Logic, QueryParameters};
use crate::schema::DBSchema;
use crate::table::DBTable;
use std::sync::Arc;

/// Create the virtual table, or refresh the filter of an existing one.
fn virtual_table(
    schema: &Arc<DBSchema>,
    name: &str,
    base: &Arc<DBTable>,
    filter: QueryParameters,
) -> Result<Arc<DBTable>> {
    match schema.table(name) {
        Some(existing) if existing.is_virtual() => {
            existing.update_def(|def| def.filter = filter);
            existing.refresh_membership();
            Ok(existing)
        }
        Some(_) => Err(TableDbError::Config(format!(
            "Table '{name}' exists and is not a virtual table"
        ))),
        None => {
            let table = schema.add_table(DBTable::new_virtual(schema, name, base, filter));
            log::debug!("Generated virtual table '{name}' over '{}'", base.name());
            Ok(table)
        }
    }
}

/// Columns a derived type adds to its base table.
fn generate_columns(base: &DBTable, extras: &TypeDescriptor) -> Result<()> {
    for column in &extras.columns {
        column.generate(base);
    }
    base.check_reserved_keys()
}

/// References and indexes a derived type adds to its base table, and its own
/// referencings. The base log table picks up the added columns.
fn generate_links(
    registry: &Registry,
    schema: &Arc<DBSchema>,
    table: &DBTable,
    extras: &TypeDescriptor,
) -> Result<()> {
    let base = table.base().ok_or_else(|| {
        TableDbError::Config(format!("Table '{}' is not a virtual table", table.name()))
    })?;
    let targets = extras
        .references
        .iter()
        .map(|reference| reference.resolve(registry, schema))
        .collect::<Result<Vec<_>>>()?;
    for (reference, target) in extras.references.iter().zip(&targets) {
        reference.generate(base, target)?;
    }
    for index in &extras.indexes {
        index.generate(base);
    }
    for referencing in &extras.referencings {
        referencing.generate(registry, table, schema)?;
    }
    if let (false, Some(log)) = (extras.columns.is_empty(), base.log_table()) {
        LogTableGenerator::generate_for(base, schema, Some(log.name()), &[])?;
    }
    Ok(())
}

/// Properties declared below the last table-owning type of the chain.
fn own_properties(chain: &[TypeMapping]) -> TypeDescriptor {
    let start = chain
        .iter()
        .rposition(|m| m.table.is_some())
        .map_or(0, |root| root + 1);
    TypeDescriptor::initialize(&chain[start..])
}

/// Generates the partition of a subtype stored in its ancestor's table and
/// discriminated by the item-type column.
pub struct ItemTypeGenerator {
    pub type_name: String,
    pub base_type: String,
    pub attribute: ItemTypeAttribute,
    pub extras: TypeDescriptor,
    memo: Memo,
}

impl ItemTypeGenerator {
    pub fn initialize(registry: &Registry, mapping: &TypeMapping) -> Result<Self> {
        let (root, chain) = registry.table_root(&mapping.name)?;
        Ok(ItemTypeGenerator {
            type_name: mapping.name.clone(),
            base_type: chain[root].name.clone(),
            attribute: mapping.item_type.clone().unwrap_or_default(),
            extras: own_properties(&chain),
            memo: Memo::default(),
        })
    }

    pub fn generate(&self, registry: &Registry, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        if let Some(table) = self.memo.get(schema) {
            return Ok(table);
        }
        let base = registry.generate(&self.base_type, schema)?.storage();
        let discriminator = base.item_type_key().ok_or_else(|| {
            TableDbError::Config(format!(
                "Table '{}' has no item type column for subtype '{}'",
                base.name(),
                self.type_name
            ))
        })?;
        let index = base.register_item_type(&self.type_name, self.attribute.index);
        let filter = QueryParameters::new().and(discriminator.name(), Comparer::EQUAL, index);
        let name = self
            .attribute
            .table
            .clone()
            .unwrap_or_else(|| self.type_name.clone());

        generate_columns(&base, &self.extras)?;
        let table = virtual_table(schema, &name, &base, filter)?;
        table.update_def(|def| {
            def.item_type = Some(index);
            def.type_name = Some(self.type_name.clone());
        });
        let table = self.memo.insert(schema, table);

        generate_links(registry, schema, &table, &self.extras)?;
        Ok(table)
    }
}

/// Generates a filtered partition of another type's table.
pub struct VirtualTableGenerator {
    pub type_name: String,
    pub attribute: VirtualTableAttribute,
    pub extras: TypeDescriptor,
    memo: Memo,
}

impl VirtualTableGenerator {
    pub fn initialize(registry: &Registry, mapping: &TypeMapping) -> Result<Self> {
        let attribute = mapping.virtual_table.clone().ok_or_else(|| {
            TableDbError::Config(format!("Type '{}' is not a virtual table", mapping.name))
        })?;
        Ok(VirtualTableGenerator {
            type_name: mapping.name.clone(),
            attribute,
            extras: own_properties(&registry.chain(&mapping.name)?),
            memo: Memo::default(),
        })
    }

    pub fn generate(&self, registry: &Registry, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        if let Some(table) = self.memo.get(schema) {
            return Ok(table);
        }
        registry.table_root(&self.attribute.base).map_err(|e| match e {
            TableDbError::NotFound { .. } => e,
            _ => TableDbError::Config(format!(
                "Virtual table '{}': base type '{}' has no table attribute in its ancestry",
                self.attribute.name, self.attribute.base
            )),
        })?;
        let source = registry.generate(&self.attribute.base, schema)?;
        let base = source.storage();
        let own = match &self.attribute.filter {
            Some(filter) => QueryParameters::parse(filter)?,
            None => QueryParameters::new(),
        };
        // A partition of a partition keeps the outer filter.
        let filter = if source.is_virtual() {
            source.filter().group(Logic::AND, own)
        } else {
            own
        };

        generate_columns(&base, &self.extras)?;
        let table = virtual_table(schema, &self.attribute.name, &base, filter)?;
        table.update_def(|def| {
            def.type_name = Some(self.type_name.clone());
            def.item_type = source.def().item_type;
        });
        let table = self.memo.insert(schema, table);

        generate_links(registry, schema, &table, &self.extras)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::order_mapping;
    use super::*;
    use crate::attribute::{ColumnKeys, PropertyMapping, TableAttribute};
    use crate::value::{DataType, Value};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register(order_mapping());
        registry.register(
            TypeMapping::new("RushOrder")
                .with_base("Order")
                .with_item_type(ItemTypeAttribute::default())
                .with_property(PropertyMapping::column(
                    "deadline",
                    DataType::DateTime,
                    ColumnKeys::empty(),
                )),
        );
        registry.register(
            TypeMapping::new("GiftOrder")
                .with_base("Order")
                .with_item_type(ItemTypeAttribute {
                    index: Some(7),
                    table: Some("gift_orders".into()),
                }),
        );
        registry.register(TypeMapping::new("PaidOrder").with_virtual_table(
            "paid_orders",
            "Order",
            "status = 'Paid'",
        ));
        registry
    }

    #[test]
    fn test_item_types_share_the_base_table() {
        let registry = registry();
        let schema = DBSchema::new("main");
        let orders = registry.generate("Order", &schema).unwrap();
        // Subtypes are generated with their base.
        let rush = schema.table("RushOrder").unwrap();
        let gift = schema.table("gift_orders").unwrap();

        assert!(orders.column("deadline").is_some());
        assert_eq!(
            orders.item_types().into_iter().collect::<Vec<_>>(),
            vec![
                (0, "Order".to_string()),
                (1, "RushOrder".to_string()),
                (7, "GiftOrder".to_string())
            ]
        );

        let item = rush.new_item();
        assert_eq!(item.get("kind"), Value::Int(1));
        rush.add(&item).unwrap();
        assert!(orders.contains(&item));
        assert!(rush.contains(&item));
        assert!(!gift.contains(&item));
        assert_eq!(registry.generate("RushOrder", &schema).unwrap().name(), "RushOrder");
    }

    #[test]
    fn test_virtual_table_filter() {
        let registry = registry();
        let schema = DBSchema::new("main");
        let paid = registry.generate("PaidOrder", &schema).unwrap();
        let orders = schema.table("orders").unwrap();
        assert!(Arc::ptr_eq(paid.base().unwrap(), &orders));

        let item = orders.new_item();
        item.set("status", "Paid").unwrap();
        orders.add(&item).unwrap();
        assert!(paid.contains(&item));
    }

    #[test]
    fn test_virtual_base_without_table_fails() {
        let registry = Registry::new();
        registry.register(TypeMapping::new("Note"));
        registry.register(TypeMapping::new("Open").with_virtual_table("open", "Note", "x = 1"));
        let err = registry.generate("Open", &DBSchema::new("main")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_subtype_without_discriminator_fails() {
        let registry = Registry::new();
        registry.register(
            TypeMapping::new("Doc")
                .with_table(TableAttribute::new("docs"))
                .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY)),
        );
        registry.register(
            TypeMapping::new("Memo")
                .with_base("Doc")
                .with_item_type(ItemTypeAttribute::default()),
        );
        let err = registry.generate("Memo", &DBSchema::new("main")).unwrap_err();
        assert!(err.is_config());
    }
}
