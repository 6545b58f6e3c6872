use crate::connection::Dialect;

/// A (possibly composite) index declared on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBIndex {
    pub name: String,
    pub table: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

impl DBIndex {
    pub fn new(table: &str, name: &str, unique: bool) -> Self {
        DBIndex {
            name: name.to_string(),
            table: table.to_string(),
            unique,
            columns: Vec::new(),
        }
    }

    pub fn format_create(&self, dialect: &dyn Dialect) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| dialect.format_column(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "create {}index {} on {} ({columns})",
            if self.unique { "unique " } else { "" },
            dialect.format_column(&self.name),
            dialect.format_table(&self.table),
        )
    }
}

/// A foreign key from one column to the primary key of another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBForeignKey {
    pub name: String,
    pub table: String,
    pub column: String,
    pub reference_table: String,
    pub reference_column: String,
}

impl DBForeignKey {
    pub fn default_name(table: &str, column: &str) -> String {
        format!("fk_{table}_{column}")
    }

    fn format_body(&self, dialect: &dyn Dialect) -> String {
        format!(
            "constraint {} foreign key ({}) references {} ({})",
            dialect.format_column(&self.name),
            dialect.format_column(&self.column),
            dialect.format_table(&self.reference_table),
            dialect.format_column(&self.reference_column),
        )
    }

    /// Constraint clause inside `create table`.
    pub fn format_inline(&self, dialect: &dyn Dialect) -> String {
        self.format_body(dialect)
    }

    pub fn format_create(&self, dialect: &dyn Dialect) -> String {
        format!(
            "alter table {} add {}",
            dialect.format_table(&self.table),
            self.format_body(dialect)
        )
    }
}
