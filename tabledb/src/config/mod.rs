//! YAML mapping files: schema settings plus the type mappings to register.

mod parser;

pub use parser::{parse_mapping, parse_mapping_str};

use crate::attribute::TypeMapping;
use serde::{Deserialize, Serialize};

/// Top-level mapping file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingFile {
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub types: Vec<TypeMapping>,
}

/// Settings of one schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Node identifier packed into the high bits of generated ids.
    #[serde(default)]
    pub database_id: i64,
    /// Default storage block size for tables that do not set one.
    #[serde(default)]
    pub block_size: Option<usize>,
    /// Replication mode suppresses audit log writes.
    #[serde(default)]
    pub replication: bool,
    #[serde(default = "default_true")]
    pub logging: bool,
}

fn default_name() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            name: default_name(),
            database_id: 0,
            block_size: None,
            replication: false,
            logging: true,
        }
    }
}

impl SchemaConfig {
    pub fn new(name: &str) -> Self {
        SchemaConfig {
            name: name.to_string(),
            ..SchemaConfig::default()
        }
    }
}
