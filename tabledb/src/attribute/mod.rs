//! Declarative mapping markers attached to domain types.
//!
//! A domain type is described by a [`TypeMapping`]: its name, its parent type
//! (for inheritance chains) and its properties. Tables, virtual tables, log
//! tables and item-type variants are derived from these markers by the
//! generator layer. The markers carry no behavior beyond accessors.

mod keys;

pub use keys::{ColumnKeys, TableKeys};

use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};

/// Marks a type as the root of a physical table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableAttribute {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub block_size: Option<usize>,
    #[serde(default)]
    pub keys: TableKeys,
    #[serde(default)]
    pub sequence: Option<String>,
    /// Generate a `<name>_log` audit table without declaring a log type.
    #[serde(default)]
    pub log: bool,
}

impl TableAttribute {
    pub fn new(name: &str) -> Self {
        TableAttribute {
            name: name.to_string(),
            group: None,
            block_size: None,
            keys: TableKeys::empty(),
            sequence: None,
            log: false,
        }
    }

    pub fn with_log(mut self) -> Self {
        self.log = true;
        self
    }

    pub fn with_keys(mut self, keys: TableKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = Some(size);
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }
}

/// Marks a property as a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnAttribute {
    pub name: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub scale: u32,
    #[serde(default)]
    pub keys: ColumnKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub culture: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl ColumnAttribute {
    pub fn new(name: &str) -> Self {
        ColumnAttribute {
            name: name.to_string(),
            size: 0,
            scale: 0,
            keys: ColumnKeys::empty(),
            default: None,
            culture: None,
            group: None,
        }
    }

    pub fn with_keys(mut self, keys: ColumnKeys) -> Self {
        self.keys |= keys;
        self
    }

    pub fn with_size(mut self, size: u32, scale: u32) -> Self {
        self.size = size;
        self.scale = scale;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_culture(mut self, culture: &str) -> Self {
        self.culture = Some(culture.to_string());
        self
    }

    /// Default value converted to the column storage type.
    pub fn default_value(&self, data_type: DataType) -> Option<Value> {
        self.default
            .as_ref()
            .map(|json| Value::from_json(json, data_type))
            .filter(|v| !v.is_null())
    }
}

/// Marks a property as part of a (possibly composite) index.
/// Properties naming the same index contribute columns to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexAttribute {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub order: i32,
}

impl IndexAttribute {
    pub fn new(name: &str, unique: bool) -> Self {
        IndexAttribute {
            name: name.to_string(),
            unique,
            order: 0,
        }
    }
}

/// Marks a column property as the owning side of a foreign key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceAttribute {
    /// Type whose table is referenced.
    pub target: String,
    /// Explicit constraint name; `fk_<table>_<column>` otherwise.
    #[serde(default)]
    pub name: Option<String>,
}

impl ReferenceAttribute {
    pub fn new(target: &str) -> Self {
        ReferenceAttribute {
            target: target.to_string(),
            name: None,
        }
    }
}

/// Marks a property as the inverse (one-to-many) side of a reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferencingAttribute {
    /// Type holding the reference column.
    pub source: String,
    /// Property of `source` that references this type.
    pub property: String,
}

impl ReferencingAttribute {
    pub fn new(source: &str, property: &str) -> Self {
        ReferencingAttribute {
            source: source.to_string(),
            property: property.to_string(),
        }
    }
}

/// Marks a subtype sharing its ancestor's physical table, discriminated by the
/// ancestor's item-type column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ItemTypeAttribute {
    /// Explicit discriminator value; the next unused one is assigned otherwise.
    #[serde(default)]
    pub index: Option<i32>,
    /// Name of the generated virtual table; the type name otherwise.
    #[serde(default)]
    pub table: Option<String>,
}

/// Marks a type as a filtered partition of its base type's table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualTableAttribute {
    pub name: String,
    /// Type whose table is partitioned. Must have a table attribute in its ancestry.
    pub base: String,
    /// Filter as a SQL `WHERE` fragment, e.g. `status = 'Paid'`.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Marks a type as the audit log of another type's table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogTableAttribute {
    pub base: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One declared property of a type with the markers attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyMapping {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    #[serde(default)]
    pub column: Option<ColumnAttribute>,
    #[serde(default)]
    pub indexes: Vec<IndexAttribute>,
    #[serde(default)]
    pub reference: Option<ReferenceAttribute>,
    #[serde(default)]
    pub referencing: Option<ReferencingAttribute>,
}

impl PropertyMapping {
    pub fn new(name: &str, data_type: DataType) -> Self {
        PropertyMapping {
            name: name.to_string(),
            data_type,
            column: None,
            indexes: Vec::new(),
            reference: None,
            referencing: None,
        }
    }

    /// Property mapped to a column named after the property.
    pub fn column(name: &str, data_type: DataType, keys: ColumnKeys) -> Self {
        let mut property = PropertyMapping::new(name, data_type);
        property.column = Some(ColumnAttribute::new(name).with_keys(keys));
        property
    }

    pub fn with_column(mut self, column: ColumnAttribute) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_index(mut self, index: IndexAttribute) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_reference(mut self, target: &str) -> Self {
        self.reference = Some(ReferenceAttribute::new(target));
        self
    }

    /// Inverse side: `source.property` references the declaring type.
    pub fn referencing(name: &str, source: &str, property: &str) -> Self {
        let mut mapping = PropertyMapping::new(name, DataType::Integer);
        mapping.referencing = Some(ReferencingAttribute::new(source, property));
        mapping
    }

    pub fn column_name(&self) -> Option<&str> {
        self.column.as_ref().map(|c| c.name.as_str())
    }
}

/// The declarative description of one domain type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeMapping {
    pub name: String,
    /// Parent type; properties of the parent chain are inherited.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub table: Option<TableAttribute>,
    #[serde(default)]
    pub item_type: Option<ItemTypeAttribute>,
    #[serde(default)]
    pub virtual_table: Option<VirtualTableAttribute>,
    #[serde(default)]
    pub log_table: Option<LogTableAttribute>,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
}

impl TypeMapping {
    pub fn new(name: &str) -> Self {
        TypeMapping {
            name: name.to_string(),
            base: None,
            table: None,
            item_type: None,
            virtual_table: None,
            log_table: None,
            properties: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    pub fn with_table(mut self, table: TableAttribute) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_item_type(mut self, attribute: ItemTypeAttribute) -> Self {
        self.item_type = Some(attribute);
        self
    }

    pub fn with_virtual_table(mut self, name: &str, base: &str, filter: &str) -> Self {
        self.virtual_table = Some(VirtualTableAttribute {
            name: name.to_string(),
            base: base.to_string(),
            filter: Some(filter.to_string()),
        });
        self
    }

    pub fn with_log_table(mut self, base: &str) -> Self {
        self.log_table = Some(LogTableAttribute {
            base: base.to_string(),
            name: None,
        });
        self
    }

    pub fn with_property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Implemented by domain types that describe their own mapping.
///
/// ```
/// use tabledb::attribute::{ColumnKeys, Entity, PropertyMapping, TableAttribute, TypeMapping};
/// use tabledb::DataType;
///
/// struct Order;
///
/// impl Entity for Order {
///     fn mapping() -> TypeMapping {
///         TypeMapping::new("Order")
///             .with_table(TableAttribute::new("orders"))
///             .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
///             .with_property(PropertyMapping::column("amount", DataType::Real, ColumnKeys::empty()))
/// }
/// }
/// ```
pub trait Entity {
    fn mapping() -> TypeMapping;

    fn type_name() -> String {
        Self::mapping().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_deserializes_from_yaml() {
        let mapping: TypeMapping = serde_yaml::from_str(
            r#"
name: Order
table: { name: orders, log: true, keys: CACHING }
properties:
  - { name: id, type: integer, column: { name: id, keys: PRIMARY } }
  - name: customer
    type: integer
    column: { name: customer_id, keys: INDEXING }
    reference: { target: Customer }
  - name: code
    type: text
    column: { name: code, size: 40 }
    indexes: [{ name: ix_orders_code, unique: true }]
"#,
        )
        .unwrap();

        let table = mapping.table.as_ref().unwrap();
        assert_eq!(table.name, "orders");
        assert!(table.log);
        assert!(table.keys.contains(TableKeys::CACHING));
        assert_eq!(mapping.properties.len(), 3);
        assert_eq!(mapping.properties[1].column_name(), Some("customer_id"));
        assert_eq!(
            mapping.properties[1].reference.as_ref().unwrap().target,
            "Customer"
        );
        assert!(mapping.properties[2].indexes[0].unique);
    }

    #[test]
    fn test_default_value_is_converted() {
        let column = ColumnAttribute::new("status").with_default(serde_json::json!("2"));
        assert_eq!(column.default_value(DataType::Integer), Some(Value::Int(2)));
    }
}
