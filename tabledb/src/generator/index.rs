use crate::attribute::PropertyMapping;
use crate::schema::DBIndex;
use crate::table::DBTable;
use indexmap::IndexMap;

/// Blueprint of an index. Every property naming the index contributes its
/// column, ordered by the attribute's `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGenerator {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

impl IndexGenerator {
    pub(crate) fn collect<'a>(properties: impl Iterator<Item = &'a PropertyMapping>) -> Vec<Self> {
        let mut indexes: IndexMap<String, (bool, Vec<(i32, String)>)> = IndexMap::new();
        for property in properties {
            let Some(column) = property.column_name() else {
                continue;
            };
            for attribute in &property.indexes {
                let entry = indexes
                    .entry(attribute.name.clone())
                    .or_insert_with(|| (false, Vec::new()));
                entry.0 |= attribute.unique;
                entry.1.push((attribute.order, column.to_string()));
            }
        }
        indexes
            .into_iter()
            .map(|(name, (unique, mut columns))| {
                columns.sort_by_key(|(order, _)| *order);
                IndexGenerator {
                    name,
                    unique,
                    columns: columns.into_iter().map(|(_, c)| c).collect(),
                }
            })
            .collect()
    }

    /// Create or refresh the index on `table`.
    pub fn generate(&self, table: &DBTable) -> DBIndex {
        let mut index = DBIndex::new(table.name(), &self.name, self.unique);
        index.columns = self
            .columns
            .iter()
            .filter(|c| table.column(c).is_some())
            .cloned()
            .collect();
        table.set_index(index.clone());
        index
    }
}
