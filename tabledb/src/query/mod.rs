//! Query model: filter parameters, comparers and select/count commands.

mod format;
mod parser;

pub use parser::parse_filter;

use crate::connection::{Command, Dialect};
use crate::error::Result;
use crate::table::DBItem;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareType {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
    In,
    Is,
    Between,
}

/// A comparison operator with an optional negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Comparer {
    pub kind: CompareType,
    pub not: bool,
}

impl Comparer {
    pub const EQUAL: Comparer = Comparer::new(CompareType::Equal, false);
    pub const NOT_EQUAL: Comparer = Comparer::new(CompareType::Equal, true);
    pub const GREATER: Comparer = Comparer::new(CompareType::Greater, false);
    pub const GREATER_OR_EQUAL: Comparer = Comparer::new(CompareType::GreaterOrEqual, false);
    pub const LESS: Comparer = Comparer::new(CompareType::Less, false);
    pub const LESS_OR_EQUAL: Comparer = Comparer::new(CompareType::LessOrEqual, false);
    pub const LIKE: Comparer = Comparer::new(CompareType::Like, false);
    pub const NOT_LIKE: Comparer = Comparer::new(CompareType::Like, true);
    pub const IN: Comparer = Comparer::new(CompareType::In, false);
    pub const NOT_IN: Comparer = Comparer::new(CompareType::In, true);
    pub const IS: Comparer = Comparer::new(CompareType::Is, false);
    pub const IS_NOT: Comparer = Comparer::new(CompareType::Is, true);
    pub const BETWEEN: Comparer = Comparer::new(CompareType::Between, false);

    pub const fn new(kind: CompareType, not: bool) -> Self {
        Comparer { kind, not }
    }

    pub fn negate(self) -> Self {
        Comparer::new(self.kind, !self.not)
    }

    /// Mirror an ordering comparer for swapped operands (`5 < x` → `x > 5`).
    pub fn mirror(self) -> Self {
        let kind = match self.kind {
            CompareType::Greater => CompareType::Less,
            CompareType::GreaterOrEqual => CompareType::LessOrEqual,
            CompareType::Less => CompareType::Greater,
            CompareType::LessOrEqual => CompareType::GreaterOrEqual,
            other => other,
        };
        Comparer::new(kind, self.not)
    }

    pub fn sql(self) -> &'static str {
        match (self.kind, self.not) {
            (CompareType::Equal, false) => "=",
            (CompareType::Equal, true) => "<>",
            (CompareType::Greater, false) => ">",
            (CompareType::Greater, true) => "<=",
            (CompareType::GreaterOrEqual, false) => ">=",
            (CompareType::GreaterOrEqual, true) => "<",
            (CompareType::Less, false) => "<",
            (CompareType::Less, true) => ">=",
            (CompareType::LessOrEqual, false) => "<=",
            (CompareType::LessOrEqual, true) => ">",
            (CompareType::Like, false) => "like",
            (CompareType::Like, true) => "not like",
            (CompareType::In, false) => "in",
            (CompareType::In, true) => "not in",
            (CompareType::Is, false) => "is",
            (CompareType::Is, true) => "is not",
            (CompareType::Between, false) => "between",
            (CompareType::Between, true) => "not between",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicType {
    And,
    Or,
}

/// How a parameter combines with the result of the parameters before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Logic {
    pub kind: LogicType,
    pub not: bool,
}

impl Logic {
    pub const AND: Logic = Logic::new(LogicType::And, false);
    pub const OR: Logic = Logic::new(LogicType::Or, false);
    pub const AND_NOT: Logic = Logic::new(LogicType::And, true);
    pub const OR_NOT: Logic = Logic::new(LogicType::Or, true);

    pub const fn new(kind: LogicType, not: bool) -> Self {
        Logic { kind, not }
    }

    pub fn negate(self) -> Self {
        Logic::new(self.kind, !self.not)
    }

    fn sql(self) -> &'static str {
        match (self.kind, self.not) {
            (LogicType::And, false) => "and",
            (LogicType::And, true) => "and not",
            (LogicType::Or, false) => "or",
            (LogicType::Or, true) => "or not",
        }
    }
}

/// A value derived from an item instead of read from a stored column.
#[derive(Clone)]
pub struct ComputedColumn {
    pub name: String,
    func: Arc<dyn Fn(&DBItem) -> Value + Send + Sync>,
}

impl ComputedColumn {
    pub fn new(name: &str, func: impl Fn(&DBItem) -> Value + Send + Sync + 'static) -> Self {
        ComputedColumn {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn invoke(&self, item: &DBItem) -> Value {
        (self.func)(item)
    }
}

impl fmt::Debug for ComputedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedColumn").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum QueryTarget {
    Column(String),
    Computed(ComputedColumn),
}

impl QueryTarget {
    pub fn name(&self) -> &str {
        match self {
            QueryTarget::Column(name) => name,
            QueryTarget::Computed(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryValue {
    Value(Value),
    List(Vec<Value>),
    /// A set of flag constants packed into one integer.
    Flags(i64),
    /// Sub-query selecting one column of another table.
    Query(Box<QQuery>),
    Range(Value, Value),
}

impl QueryValue {
    /// Rewrite special-cased inputs before evaluation: flag sets expand to a
    /// list, `like` strings get wildcards, `in` strings are split on commas.
    pub fn normalize(&self, comparer: Comparer) -> (Comparer, QueryValue) {
        match (self, comparer.kind) {
            (QueryValue::Flags(bits), _) => {
                let list = (0..63)
                    .map(|bit| 1i64 << bit)
                    .filter(|flag| bits & flag != 0)
                    .map(Value::Int)
                    .collect();
                let comparer = if comparer.kind == CompareType::Equal {
                    Comparer::new(CompareType::In, comparer.not)
                } else {
                    comparer
                };
                (comparer, QueryValue::List(list))
            }
            (QueryValue::Value(Value::Text(text)), CompareType::Like) => {
                let pattern = if text.contains('%') || text.contains('_') {
                    text.clone()
                } else {
                    format!("%{text}%")
                };
                (comparer, QueryValue::Value(Value::Text(pattern)))
            }
            (QueryValue::Value(Value::Text(text)), CompareType::In) => {
                let list = text
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Value::from)
                    .collect();
                (comparer, QueryValue::List(list))
            }
            (QueryValue::List(list), CompareType::Equal) => {
                (Comparer::new(CompareType::In, comparer.not), QueryValue::List(list.clone()))
            }
            (QueryValue::Value(value), CompareType::In) => {
                (comparer, QueryValue::List(vec![value.clone()]))
            }
            _ => (comparer, self.clone()),
        }
    }
}

impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        QueryValue::Value(value)
    }
}

#[derive(Debug, Clone)]
pub enum ParameterKind {
    Compare {
        target: QueryTarget,
        comparer: Comparer,
        value: QueryValue,
    },
    Group(QueryParameters),
}

#[derive(Debug, Clone)]
pub struct QueryParameter {
    pub logic: Logic,
    pub kind: ParameterKind,
}

impl QueryParameter {
    pub fn compare(
        logic: Logic,
        column: &str,
        comparer: Comparer,
        value: impl Into<QueryValue>,
    ) -> Self {
        QueryParameter {
            logic,
            kind: ParameterKind::Compare {
                target: QueryTarget::Column(column.to_string()),
                comparer,
                value: value.into(),
            },
        }
    }
}

/// An ordered list of parameters evaluated left to right.
#[derive(Debug, Clone, Default)]
pub struct QueryParameters {
    items: Vec<QueryParameter>,
}

impl QueryParameters {
    pub fn new() -> Self {
        QueryParameters::default()
    }

    /// Parse a SQL `WHERE` fragment such as `status = 'Paid' and amount > 10`.
    pub fn parse(filter: &str) -> Result<Self> {
        parse_filter(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryParameter> {
        self.items.iter()
    }

    pub fn push(&mut self, parameter: QueryParameter) {
        self.items.push(parameter);
    }

    pub fn add(
        mut self,
        logic: Logic,
        column: &str,
        comparer: Comparer,
        value: impl Into<Value>,
    ) -> Self {
        self.items.push(QueryParameter::compare(
            logic,
            column,
            comparer,
            QueryValue::Value(value.into()),
        ));
        self
    }

    pub fn and(self, column: &str, comparer: Comparer, value: impl Into<Value>) -> Self {
        self.add(Logic::AND, column, comparer, value)
    }

    pub fn or(self, column: &str, comparer: Comparer, value: impl Into<Value>) -> Self {
        self.add(Logic::OR, column, comparer, value)
    }

    pub fn and_value(mut self, column: &str, comparer: Comparer, value: QueryValue) -> Self {
        self.items
            .push(QueryParameter::compare(Logic::AND, column, comparer, value));
        self
    }

    pub fn and_computed(
        mut self,
        computed: ComputedColumn,
        comparer: Comparer,
        value: impl Into<Value>,
    ) -> Self {
        self.items.push(QueryParameter {
            logic: Logic::AND,
            kind: ParameterKind::Compare {
                target: QueryTarget::Computed(computed),
                comparer,
                value: QueryValue::Value(value.into()),
            },
        });
        self
    }

    pub fn group(mut self, logic: Logic, group: QueryParameters) -> Self {
        self.items.push(QueryParameter {
            logic,
            kind: ParameterKind::Group(group),
        });
        self
    }

    /// Names of all stored columns the parameters compare against.
    pub fn columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        for parameter in &self.items {
            match &parameter.kind {
                ParameterKind::Compare {
                    target: QueryTarget::Column(name),
                    ..
                } => {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                ParameterKind::Group(group) => {
                    for name in group.columns() {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
                ParameterKind::Compare { .. } => {}
            }
        }
        names
    }

    /// Render a `WHERE` body with bound parameters. `None` when nothing can be
    /// pushed to the server without changing the result.
    pub fn format(&self, dialect: &dyn Dialect, bindings: &mut Vec<(String, Value)>) -> Option<String> {
        format::format_parameters(self, dialect, bindings)
    }
}

impl<'a> IntoIterator for &'a QueryParameters {
    type Item = &'a QueryParameter;
    type IntoIter = std::slice::Iter<'a, QueryParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOrder {
    pub column: String,
    pub descending: bool,
}

/// A select over one table: projection, filter and ordering.
#[derive(Debug, Clone)]
pub struct QQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub parameters: QueryParameters,
    pub orders: Vec<QueryOrder>,
}

impl QQuery {
    pub fn new(table: &str) -> Self {
        QQuery {
            table: table.to_string(),
            columns: Vec::new(),
            parameters: QueryParameters::new(),
            orders: Vec::new(),
        }
    }

    /// Query over `table` filtered by a SQL `WHERE` fragment.
    pub fn parse(table: &str, filter: &str) -> Result<Self> {
        let mut query = QQuery::new(table);
        if !filter.trim().is_empty() {
            query.parameters = parse_filter(filter)?;
        }
        Ok(query)
    }

    pub fn with_parameters(mut self, parameters: QueryParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn column(mut self, name: &str) -> Self {
        self.columns.push(name.to_string());
        self
    }

    pub fn and(mut self, column: &str, comparer: Comparer, value: impl Into<Value>) -> Self {
        self.parameters = self.parameters.and(column, comparer, value);
        self
    }

    pub fn or(mut self, column: &str, comparer: Comparer, value: impl Into<Value>) -> Self {
        self.parameters = self.parameters.or(column, comparer, value);
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.orders.push(QueryOrder {
            column: column.to_string(),
            descending,
        });
        self
    }

    /// Build the select command with bound parameters.
    pub fn format_select(&self, dialect: &dyn Dialect) -> Command {
        let mut bindings = Vec::new();
        let text = self.format_select_text(dialect, &mut bindings);
        Command::with_parameters(text, bindings)
    }

    /// Build a `select count(*)` command over the same filter.
    pub fn format_count(&self, dialect: &dyn Dialect) -> Command {
        let mut bindings = Vec::new();
        let mut text = format!("select count(*) from {}", dialect.format_table(&self.table));
        if let Some(filter) = self.parameters.format(dialect, &mut bindings) {
            text.push_str(" where ");
            text.push_str(&filter);
        }
        Command::with_parameters(text, bindings)
    }

    pub(crate) fn format_select_text(
        &self,
        dialect: &dyn Dialect,
        bindings: &mut Vec<(String, Value)>,
    ) -> String {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| dialect.format_column(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut text = format!("select {projection} from {}", dialect.format_table(&self.table));
        if let Some(filter) = self.parameters.format(dialect, bindings) {
            text.push_str(" where ");
            text.push_str(&filter);
        }
        if !self.orders.is_empty() {
            let orders = self
                .orders
                .iter()
                .map(|o| {
                    let direction = if o.descending { " desc" } else { "" };
                    format!("{}{direction}", dialect.format_column(&o.column))
                })
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(" order by ");
            text.push_str(&orders);
        }
        text
    }
}
