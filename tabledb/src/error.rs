use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableDbError {
    /// Raised while generating schema objects from type mappings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raised when a row could not be written to the backing store.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("SQL parse error: {0}")]
    SqlParse(String),

    #[error("Snapshot format error: {0}")]
    Snapshot(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl TableDbError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        TableDbError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether the error was caused by schema configuration rather than data.
    pub fn is_config(&self) -> bool {
        matches!(self, TableDbError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, TableDbError>;
