use super::MappingFile;
use crate::error::Result;
use std::path::Path;

/// Parse a mapping YAML file into a MappingFile
pub fn parse_mapping(path: &Path) -> Result<MappingFile> {
    let content = std::fs::read_to_string(path)?;
    parse_mapping_str(&content)
}

/// Parse a mapping YAML string into a MappingFile
pub fn parse_mapping_str(content: &str) -> Result<MappingFile> {
    let mapping: MappingFile = serde_yaml::from_str(content)?;
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::ColumnKeys;

    const MAPPING: &str = r#"
schema:
  name: sales
  database_id: 3
  replication: false
types:
  - name: Order
    table: { name: orders, log: true }
    properties:
      - { name: id, type: integer, column: { name: id, keys: PRIMARY } }
      - { name: status, type: text, column: { name: status, keys: INDEXING } }
  - name: PaidOrder
    virtual_table: { name: paid_orders, base: Order, filter: "status = 'Paid'" }
"#;

    #[test]
    fn test_parse_mapping_str() {
        let mapping = parse_mapping_str(MAPPING).unwrap();
        assert_eq!(mapping.schema.name, "sales");
        assert_eq!(mapping.schema.database_id, 3);
        assert!(mapping.schema.logging);
        assert_eq!(mapping.types.len(), 2);
        let order = &mapping.types[0];
        assert_eq!(
            order.properties[0].column.as_ref().unwrap().keys,
            ColumnKeys::PRIMARY
        );
        let paid = mapping.types[1].virtual_table.as_ref().unwrap();
        assert_eq!(paid.filter.as_deref(), Some("status = 'Paid'"));
    }

    #[test]
    fn test_parse_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        std::fs::write(&path, MAPPING).unwrap();
        let mapping = parse_mapping(&path).unwrap();
        assert_eq!(mapping.types[0].name, "Order");
    }

    #[test]
    fn test_defaults() {
        let mapping = parse_mapping_str("types: []").unwrap();
        assert_eq!(mapping.schema.name, "main");
        assert!(mapping.schema.logging);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(parse_mapping_str("types: [").is_err());
    }
}
