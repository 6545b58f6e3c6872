use super::Registry;
use crate::attribute::{ColumnKeys, PropertyMapping};
use crate::error::{Result, TableDbError};
use crate::schema::{DBForeignKey, DBReferencing, DBSchema};
use crate::table::DBTable;
use std::sync::Arc;

/// Owning side of a foreign key: a column referencing another type's table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGenerator {
    pub property: String,
    pub column: String,
    pub target: String,
    pub name: Option<String>,
}

impl ReferenceGenerator {
    pub fn from_property(property: &PropertyMapping) -> Option<Self> {
        let reference = property.reference.as_ref()?;
        Some(ReferenceGenerator {
            property: property.name.clone(),
            column: property.column_name()?.to_string(),
            target: reference.target.clone(),
            name: reference.name.clone(),
        })
    }

    /// Generate the target type and check that its table has a primary key.
    pub fn resolve(&self, registry: &Registry, schema: &Arc<DBSchema>) -> Result<Arc<DBTable>> {
        let target = registry.generate(&self.target, schema)?.storage();
        if target.primary_key().is_none() {
            return Err(TableDbError::Config(format!(
                "Reference '{}' targets '{}' whose table '{}' has no primary key",
                self.property,
                self.target,
                target.name()
            )));
        }
        Ok(target)
    }

    pub fn generate(&self, table: &DBTable, target: &DBTable) -> Result<DBForeignKey> {
        let column = table.column_or_err(&self.column)?;
        let primary = target.primary_key().ok_or_else(|| {
            TableDbError::Config(format!("Table '{}' has no primary key", target.name()))
        })?;
        column.update(|def| {
            def.reference_table = Some(target.name().to_string());
            def.keys |= ColumnKeys::REFERENCE;
        });
        if column.ensure_index().is_some() {
            table.index_column(&column);
        }
        let fk = DBForeignKey {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| DBForeignKey::default_name(table.name(), &self.column)),
            table: table.name().to_string(),
            column: self.column.clone(),
            reference_table: target.name().to_string(),
            reference_column: primary.name().to_string(),
        };
        table.set_foreign_key(fk.clone());
        Ok(fk)
    }
}

/// Inverse side of a reference, registered on the referenced table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencingGenerator {
    pub name: String,
    pub source: String,
    pub source_property: String,
}

impl ReferencingGenerator {
    pub fn from_property(property: &PropertyMapping) -> Option<Self> {
        let referencing = property.referencing.as_ref()?;
        Some(ReferencingGenerator {
            name: property.name.clone(),
            source: referencing.source.clone(),
            source_property: referencing.property.clone(),
        })
    }

    pub fn generate(
        &self,
        registry: &Registry,
        table: &DBTable,
        schema: &Arc<DBSchema>,
    ) -> Result<DBReferencing> {
        let source = registry.generate(&self.source, schema)?;
        let descriptor = registry.descriptor(&self.source)?;
        let column = descriptor
            .column_for_property(&self.source_property)
            .ok_or_else(|| {
                TableDbError::not_found(
                    "property",
                    format!("{}.{}", self.source, self.source_property),
                )
            })?;
        let referencing = DBReferencing {
            name: self.name.clone(),
            table: source.name().to_string(),
            column: column.name.clone(),
        };
        table.set_referencing(referencing.clone());
        Ok(referencing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{TableAttribute, TypeMapping};
    use crate::value::DataType;

    fn customer() -> TypeMapping {
        TypeMapping::new("Customer")
            .with_table(TableAttribute::new("customers"))
            .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
            .with_property(PropertyMapping::referencing("orders", "Order", "customer"))
    }

    fn order() -> TypeMapping {
        TypeMapping::new("Order")
            .with_table(TableAttribute::new("orders"))
            .with_property(PropertyMapping::column("id", DataType::Integer, ColumnKeys::PRIMARY))
            .with_property(
                PropertyMapping::column("customer", DataType::Integer, ColumnKeys::empty())
                    .with_reference("Customer"),
            )
    }

    #[test]
    fn test_mutual_references_terminate() {
        let registry = Registry::new();
        registry.register(customer());
        registry.register(order());
        let schema = DBSchema::new("main");

        let customers = registry.generate("Customer", &schema).unwrap();
        let orders = schema.table("orders").unwrap();
        assert_eq!(
            customers.referencing("orders").unwrap(),
            DBReferencing {
                name: "orders".into(),
                table: "orders".into(),
                column: "customer".into(),
            }
        );
        let column = orders.column("customer").unwrap();
        assert_eq!(column.reference_table().as_deref(), Some("customers"));
        assert!(column.index().is_some());
        assert_eq!(orders.foreign_keys().len(), 1);

        // Regeneration does not duplicate anything.
        registry.generate("Order", &schema).unwrap();
        assert_eq!(orders.foreign_keys().len(), 1);
        assert_eq!(customers.referencings().len(), 1);
    }

    #[test]
    fn test_target_without_primary_key_fails() {
        let registry = Registry::new();
        registry.register(
            TypeMapping::new("Customer")
                .with_table(TableAttribute::new("customers"))
                .with_property(PropertyMapping::column("name", DataType::Text, ColumnKeys::empty())),
        );
        registry.register(order());
        let err = registry.generate("Order", &DBSchema::new("main")).unwrap_err();
        assert!(err.is_config());
    }
}
