//! Derives schema objects from registered type mappings.
//!
//! Types are registered into a [`Registry`] explicitly, through
//! [`Entity`], or from a mapping file. [`Registry::generate`] materializes
//! the table of a type in a schema exactly once per schema; later calls
//! return the memoized table. Generation is a sync: regenerating against a
//! schema that already holds the table refreshes it in place.

mod column;
mod index;
mod log_table;
mod reference;
mod table;
mod virtual_table;

pub use column::ColumnGenerator;
pub use index::IndexGenerator;
pub use log_table::LogTableGenerator;
pub use reference::{ReferenceGenerator, ReferencingGenerator};
pub use table::TableGenerator;
pub use virtual_table::{ItemTypeGenerator, VirtualTableGenerator};

use crate::attribute::{Entity, TypeMapping};
use crate::config::MappingFile;
use crate::error::{Result, TableDbError};
use crate::schema::DBSchema;
use crate::table::{DBTable, Table};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Tables generated by one generator, keyed by schema name.
#[derive(Default)]
pub(crate) struct Memo {
    tables: RwLock<HashMap<String, Arc<DBTable>>>,
}

impl Memo {
    pub(crate) fn get(&self, schema: &DBSchema) -> Option<Arc<DBTable>> {
        self.tables
            .read()
            .get(schema.name())
            .filter(|table| belongs(table, schema))
            .cloned()
    }

    /// Remember `table` unless another thread got there first; returns the
    /// table that is remembered. An entry left by a dropped schema of the
    /// same name is replaced.
    pub(crate) fn insert(&self, schema: &DBSchema, table: Arc<DBTable>) -> Arc<DBTable> {
        let mut tables = self.tables.write();
        match tables.get(schema.name()) {
            Some(existing) if belongs(existing, schema) => existing.clone(),
            _ => {
                tables.insert(schema.name().to_string(), table.clone());
                table
            }
        }
    }
}

fn belongs(table: &DBTable, schema: &DBSchema) -> bool {
    table
        .schema()
        .map_or(false, |owner| std::ptr::eq(Arc::as_ptr(&owner), schema))
}

/// Schema-independent blueprint of a type: the merged properties of its
/// parent chain, sorted into column, index and reference descriptors.
#[derive(Debug, Clone, Default)]
pub struct TypeDescriptor {
    pub columns: Vec<ColumnGenerator>,
    pub indexes: Vec<IndexGenerator>,
    pub references: Vec<ReferenceGenerator>,
    pub referencings: Vec<ReferencingGenerator>,
}

impl TypeDescriptor {
    /// Merge the properties of `chain`, root first. A property declared again
    /// further down replaces the earlier one. Columns are ordered
    /// discriminator, primary key, then declaration order.
    pub fn initialize(chain: &[TypeMapping]) -> Self {
        let mut properties = IndexMap::new();
        for mapping in chain {
            for property in &mapping.properties {
                properties.insert(property.name.clone(), property.clone());
            }
        }

        let mut columns: Vec<_> = properties
            .values()
            .filter_map(ColumnGenerator::from_property)
            .collect();
        columns.sort_by_key(ColumnGenerator::rank);

        let references = properties
            .values()
            .filter_map(ReferenceGenerator::from_property)
            .collect();
        let referencings = properties
            .values()
            .filter_map(ReferencingGenerator::from_property)
            .collect();

        TypeDescriptor {
            indexes: IndexGenerator::collect(properties.values()),
            columns,
            references,
            referencings,
        }
    }

    pub fn column_for_property(&self, property: &str) -> Option<&ColumnGenerator> {
        self.columns.iter().find(|c| c.property == property)
    }
}

enum Generator {
    Table(TableGenerator),
    ItemType(ItemTypeGenerator),
    Virtual(VirtualTableGenerator),
    Log(LogTableGenerator),
}

/// Registered type mappings and their generators.
#[derive(Default)]
pub struct Registry {
    types: RwLock<IndexMap<String, TypeMapping>>,
    generators: RwLock<HashMap<String, Arc<Generator>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registry holding every type of a mapping file.
    pub fn from_mapping(file: &MappingFile) -> Self {
        let registry = Registry::new();
        for mapping in &file.types {
            registry.register(mapping.clone());
        }
        registry
    }

    /// Register or replace a type. Cached blueprints are dropped; tables
    /// already generated are refreshed by the next [`Registry::generate`].
    pub fn register(&self, mapping: TypeMapping) {
        log::debug!("Registered type '{}'", mapping.name);
        self.types.write().insert(mapping.name.clone(), mapping);
        self.generators.write().clear();
    }

    pub fn register_entity<E: Entity>(&self) {
        self.register(E::mapping());
    }

    pub fn mapping(&self, type_name: &str) -> Option<TypeMapping> {
        self.types.read().get(type_name).cloned()
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    /// The parent chain of a type, root first.
    pub fn chain(&self, type_name: &str) -> Result<Vec<TypeMapping>> {
        let types = self.types.read();
        let mut chain = Vec::new();
        let mut next = Some(type_name.to_string());
        while let Some(name) = next {
            let mapping = types
                .get(&name)
                .ok_or_else(|| TableDbError::not_found("type", name.as_str()))?;
            if chain.iter().any(|m: &TypeMapping| m.name == mapping.name) {
                return Err(TableDbError::Config(format!(
                    "Type '{type_name}' has a cyclic parent chain"
                )));
            }
            next = mapping.base.clone();
            chain.push(mapping.clone());
        }
        chain.reverse();
        Ok(chain)
    }

    /// Nearest type of the chain carrying a table attribute.
    pub(crate) fn table_root(&self, type_name: &str) -> Result<(usize, Vec<TypeMapping>)> {
        let chain = self.chain(type_name)?;
        let root = chain
            .iter()
            .rposition(|m| m.table.is_some())
            .ok_or_else(|| {
                TableDbError::Config(format!(
                    "Type '{type_name}' has no table attribute in its ancestry"
                ))
            })?;
        Ok((root, chain))
    }

    /// Registered item-type subtypes stored in the table of `type_name`.
    pub fn item_subtypes(&self, type_name: &str) -> Vec<String> {
        let candidates: Vec<String> = self
            .types
            .read()
            .values()
            .filter(|m| m.name != type_name && m.item_type.is_some())
            .map(|m| m.name.clone())
            .collect();
        candidates
            .into_iter()
            .filter(|name| {
                self.table_root(name)
                    .is_ok_and(|(root, chain)| chain[root].name == type_name)
            })
            .collect()
    }

    fn generator(&self, type_name: &str) -> Result<Arc<Generator>> {
        if let Some(generator) = self.generators.read().get(type_name) {
            return Ok(generator.clone());
        }
        let mapping = self
            .mapping(type_name)
            .ok_or_else(|| TableDbError::not_found("type", type_name))?;
        let generator = if mapping.virtual_table.is_some() {
            Generator::Virtual(VirtualTableGenerator::initialize(self, &mapping)?)
        } else if mapping.log_table.is_some() {
            Generator::Log(LogTableGenerator::initialize(self, &mapping)?)
        } else if mapping.item_type.is_some() || mapping.table.is_none() {
            Generator::ItemType(ItemTypeGenerator::initialize(self, &mapping)?)
        } else {
            Generator::Table(TableGenerator::initialize(self, type_name)?)
        };
        Ok(self
            .generators
            .write()
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(generator))
            .clone())
    }

    /// The table of `type_name` in `schema`, generated on first use.
    pub fn generate(&self, type_name: &str, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        match &*self.generator(type_name)? {
            Generator::Table(g) => g.generate(self, schema),
            Generator::ItemType(g) => g.generate(self, schema),
            Generator::Virtual(g) => g.generate(self, schema),
            Generator::Log(g) => g.generate(self, schema),
        }
    }

    pub fn generate_entity<E: Entity>(&self, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        self.generate(&E::type_name(), schema)
    }

    /// Generate every registered type, in registration order.
    pub fn generate_all(&self, schema: &Arc<DBSchema>) -> Result<Vec<Arc<DBTable>>> {
        self.type_names()
            .iter()
            .map(|name| self.generate(name, schema))
            .collect()
    }

    /// Typed access to the table of `type_name`.
    pub fn table<T: Serialize + DeserializeOwned>(
        &self,
        type_name: &str,
        schema: &Arc<DBSchema>,
    ) -> Result<Table<T>> {
        Ok(Table::new(self.generate(type_name, schema)?))
    }

    /// Blueprint of a type's own columns, as generated into its table.
    pub fn descriptor(&self, type_name: &str) -> Result<TypeDescriptor> {
        Ok(TypeDescriptor::initialize(&self.chain(type_name)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attribute::{
        ColumnAttribute, ColumnKeys, IndexAttribute, ItemTypeAttribute, PropertyMapping,
        TableAttribute,
    };
    use crate::value::DataType;
    use pretty_assertions::assert_eq;

    pub(crate) fn order_mapping() -> TypeMapping {
        TypeMapping::new("Order")
            .with_table(TableAttribute::new("orders").with_log())
            .with_property(PropertyMapping::column("amount", DataType::Real, ColumnKeys::empty()))
            .with_property(PropertyMapping::column(
                "status",
                DataType::Text,
                ColumnKeys::INDEXING,
            ))
            .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
            .with_property(PropertyMapping::column(
                "kind",
                DataType::Integer,
                ColumnKeys::ITEM_TYPE,
            ))
    }

    fn names(table: &DBTable) -> Vec<String> {
        table.columns().iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn test_column_order_discriminator_then_primary() {
        let descriptor = TypeDescriptor::initialize(&[order_mapping()]);
        let columns: Vec<_> = descriptor.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["kind", "id", "amount", "status"]);
    }

    #[test]
    fn test_redeclared_property_replaces_parent() {
        let parent = TypeMapping::new("Base")
            .with_table(TableAttribute::new("base"))
            .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
            .with_property(PropertyMapping::column("note", DataType::Text, ColumnKeys::empty()));
        let child = TypeMapping::new("Child").with_base("Base").with_property(
            PropertyMapping::new("note", DataType::Text)
                .with_column(ColumnAttribute::new("note").with_size(200, 0)),
        );
        let descriptor = TypeDescriptor::initialize(&[parent, child]);
        assert_eq!(descriptor.columns.len(), 2);
        assert_eq!(descriptor.columns[1].attribute.size, 200);
    }

    #[test]
    fn test_generate_is_memoized() {
        let registry = Registry::new();
        registry.register(order_mapping());
        let schema = DBSchema::new("main");
        let first = registry.generate("Order", &schema).unwrap();
        let second = registry.generate("Order", &schema).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(names(&first), vec!["kind", "id", "amount", "status"]);
        assert_eq!(first.type_name().as_deref(), Some("Order"));

        let other = DBSchema::new("other");
        let third = registry.generate("Order", &other).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_regeneration_after_register_syncs_in_place() {
        let registry = Registry::new();
        registry.register(order_mapping());
        let schema = DBSchema::new("main");
        let table = registry.generate("Order", &schema).unwrap();
        let amount = table.column("amount").unwrap();

        registry.register(order_mapping().with_property(
            PropertyMapping::column("code", DataType::Text, ColumnKeys::CODE)
                .with_index(IndexAttribute::new("ix_orders_code", true)),
        ));
        let again = registry.generate("Order", &schema).unwrap();
        assert!(Arc::ptr_eq(&table, &again));
        assert!(Arc::ptr_eq(&amount, &table.column("amount").unwrap()));
        assert_eq!(table.code_key().unwrap().name(), "code");
        assert!(table.index("ix_orders_code").unwrap().unique);
    }

    #[test]
    fn test_unknown_and_cyclic_types() {
        let registry = Registry::new();
        assert!(matches!(
            registry.generate("Missing", &DBSchema::new("main")),
            Err(TableDbError::NotFound { .. })
        ));
        registry.register(TypeMapping::new("A").with_base("B"));
        registry.register(TypeMapping::new("B").with_base("A"));
        assert!(registry.chain("A").unwrap_err().is_config());
    }

    #[test]
    fn test_type_without_table_is_config_error() {
        let registry = Registry::new();
        registry.register(
            TypeMapping::new("Loose")
                .with_item_type(ItemTypeAttribute::default())
                .with_property(PropertyMapping::column("x", DataType::Text, ColumnKeys::empty())),
        );
        let err = registry.generate("Loose", &DBSchema::new("main")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_from_mapping_generates_all() {
        let file = crate::config::parse_mapping_str(
            r#"
schema: { name: shop }
types:
  - name: Customer
    table: { name: customers }
    properties:
      - { name: id, type: integer, column: { name: id, keys: PRIMARY } }
      - { name: name, type: text, column: { name: name } }
  - name: Order
    table: { name: orders }
    properties:
      - { name: id, type: integer, column: { name: id, keys: PRIMARY } }
      - name: customer
        type: integer
        column: { name: customer_id }
        reference: { target: Customer }
"#,
        )
        .unwrap();
        let registry = Registry::from_mapping(&file);
        let schema = DBSchema::with_config(file.schema.clone());
        let tables = registry.generate_all(&schema).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(schema.tables().len(), 2);
        let fk = &schema.table("orders").unwrap().foreign_keys()[0];
        assert_eq!(fk.name, "fk_orders_customer_id");
        assert_eq!(fk.reference_table, "customers");
    }
}
