use super::{DBItem, DBTable};
use crate::error::{Result, TableDbError};
use crate::query::{
    CompareType, Comparer, ComputedColumn, Logic, LogicType, ParameterKind, QQuery,
    QueryParameters, QueryTarget, QueryValue,
};
use crate::schema::DBColumn;
use crate::storage::PullIndex;
use crate::value::Value;
use crate::view::ItemComparer;
use indexmap::IndexMap;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

type ItemSet = IndexMap<usize, Arc<DBItem>>;

#[derive(Debug)]
enum Target {
    Column(Arc<DBColumn>),
    Computed(ComputedColumn),
}

impl Target {
    fn value(&self, item: &DBItem) -> Value {
        match self {
            Target::Column(column) => column.value(item.handle()),
            Target::Computed(computed) => computed.invoke(item),
        }
    }
}

#[derive(Debug)]
enum Expected {
    Single(Value),
    List(Vec<Value>),
    Range(Value, Value),
    Pattern(Regex),
}

#[derive(Debug)]
enum Prepared {
    Compare {
        target: Target,
        comparer: Comparer,
        expected: Expected,
    },
    Group(PreparedQuery),
}

/// Query parameters bound to the columns of one table, with values coerced to
/// the column types and `like` patterns compiled. Evaluates in memory.
#[derive(Debug, Default)]
pub struct PreparedQuery {
    items: Vec<(Logic, Prepared)>,
}

impl PreparedQuery {
    pub fn prepare(table: &DBTable, parameters: &QueryParameters) -> Result<Self> {
        let mut items = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let prepared = match &parameter.kind {
                ParameterKind::Group(group) => {
                    Prepared::Group(PreparedQuery::prepare(table, group)?)
                }
                ParameterKind::Compare {
                    target,
                    comparer,
                    value,
                } => prepare_compare(table, target, *comparer, value)?,
            };
            items.push((parameter.logic, prepared));
        }
        Ok(PreparedQuery { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Evaluate against one item, folding left to right.
    pub fn matches(&self, item: &DBItem) -> bool {
        let mut result = true;
        for (i, (logic, prepared)) in self.items.iter().enumerate() {
            if i == 0 {
                result = prepared.matches(item) != logic.not;
                continue;
            }
            match logic.kind {
                LogicType::And if result => result = prepared.matches(item) != logic.not,
                LogicType::Or if !result => result = prepared.matches(item) != logic.not,
                _ => {}
            }
        }
        result
    }

    /// Set-based evaluation over `scope`. `And` narrows the previous result,
    /// `Or` unions with the branch evaluated over the whole scope.
    fn evaluate(&self, scope: &ItemSet) -> ItemSet {
        let mut result: Option<ItemSet> = None;
        for (logic, prepared) in &self.items {
            result = Some(match result {
                None => {
                    let branch = prepared.select(scope);
                    if logic.not {
                        difference(scope, &branch)
                    } else {
                        branch
                    }
                }
                Some(previous) => match logic.kind {
                    LogicType::And if previous.is_empty() => previous,
                    LogicType::And => {
                        let branch = prepared.select(&previous);
                        if logic.not {
                            difference(&previous, &branch)
                        } else {
                            branch
                        }
                    }
                    LogicType::Or => {
                        let branch = prepared.select(scope);
                        let branch = if logic.not {
                            difference(scope, &branch)
                        } else {
                            branch
                        };
                        union(previous, branch)
                    }
                },
            });
        }
        result.unwrap_or_else(|| scope.clone())
    }

    /// A lone positive comparison answerable from a column index.
    fn index_lookup(&self) -> Option<Vec<Arc<DBItem>>> {
        match self.items.as_slice() {
            [(logic, prepared)] if !logic.not => prepared.index_lookup(),
            _ => None,
        }
    }
}

impl Prepared {
    fn matches(&self, item: &DBItem) -> bool {
        match self {
            Prepared::Group(group) => group.matches(item),
            Prepared::Compare {
                target,
                comparer,
                expected,
            } => compare(&target.value(item), *comparer, expected),
        }
    }

    fn select(&self, scope: &ItemSet) -> ItemSet {
        if let Prepared::Group(group) = self {
            return group.evaluate(scope);
        }
        if let Some(found) = self.index_lookup() {
            return found
                .into_iter()
                .filter(|item| scope.contains_key(&item.handle()))
                .map(|item| (item.handle(), item))
                .collect();
        }
        scope
            .iter()
            .filter(|(_, item)| self.matches(item))
            .map(|(handle, item)| (*handle, item.clone()))
            .collect()
    }

    fn index_lookup(&self) -> Option<Vec<Arc<DBItem>>> {
        let Prepared::Compare {
            target: Target::Column(column),
            comparer,
            expected,
        } = self
        else {
            return None;
        };
        if !PullIndex::supports(*comparer) {
            return None;
        }
        let index = column.index()?;
        let values = match expected {
            Expected::Single(value) => vec![value.clone()],
            Expected::List(values) => values.clone(),
            Expected::Range(low, high) => vec![low.clone(), high.clone()],
            Expected::Pattern(_) => return None,
        };
        Some(index.select(*comparer, &values))
    }
}

fn difference(all: &ItemSet, remove: &ItemSet) -> ItemSet {
    all.iter()
        .filter(|(handle, _)| !remove.contains_key(*handle))
        .map(|(handle, item)| (*handle, item.clone()))
        .collect()
}

fn union(mut left: ItemSet, right: ItemSet) -> ItemSet {
    for (handle, item) in right {
        left.entry(handle).or_insert(item);
    }
    left
}

fn ordered(value: &Value, expected: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    !value.is_null() && !expected.is_null() && accept(value.cmp(expected))
}

fn compare(value: &Value, comparer: Comparer, expected: &Expected) -> bool {
    let positive = match (comparer.kind, expected) {
        (CompareType::Is, _) => value.is_null(),
        (CompareType::Equal, Expected::Single(e)) => value == e,
        (CompareType::Greater, Expected::Single(e)) => ordered(value, e, |o| o.is_gt()),
        (CompareType::GreaterOrEqual, Expected::Single(e)) => ordered(value, e, |o| o.is_ge()),
        (CompareType::Less, Expected::Single(e)) => ordered(value, e, |o| o.is_lt()),
        (CompareType::LessOrEqual, Expected::Single(e)) => ordered(value, e, |o| o.is_le()),
        (CompareType::Like, Expected::Pattern(pattern)) => match value {
            Value::Null => false,
            Value::Text(text) => pattern.is_match(text),
            other => pattern.is_match(&other.to_string()),
        },
        (CompareType::In | CompareType::Equal, Expected::List(list)) => list.contains(value),
        (CompareType::Between, Expected::Range(low, high)) => {
            !value.is_null() && low <= value && value <= high
        }
        _ => false,
    };
    positive != comparer.not
}

/// Translate a SQL `like` pattern into an anchored case-insensitive regex.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::from("(?is)^");
    for ch in pattern.chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| TableDbError::Query(e.to_string()))
}

fn prepare_compare(
    table: &DBTable,
    target: &QueryTarget,
    comparer: Comparer,
    value: &QueryValue,
) -> Result<Prepared> {
    let target = match target {
        QueryTarget::Column(name) => Target::Column(table.column_or_err(name)?),
        QueryTarget::Computed(computed) => Target::Computed(computed.clone()),
    };
    let coerce = |value: &Value| match &target {
        Target::Column(column) => {
            let coerced = value.coerce(column.data_type());
            // An unconvertible literal must not turn into a null test.
            if coerced.is_null() && !value.is_null() {
                value.clone()
            } else {
                coerced
            }
        }
        Target::Computed(_) => value.clone(),
    };
    let (mut comparer, value) = value.normalize(comparer);
    let expected = match (comparer.kind, value) {
        (CompareType::Is, _) => Expected::Single(Value::Null),
        (CompareType::Equal, QueryValue::Value(Value::Null)) => {
            comparer = Comparer::new(CompareType::Is, comparer.not);
            Expected::Single(Value::Null)
        }
        (CompareType::Like, QueryValue::Value(pattern)) => {
            Expected::Pattern(like_regex(&pattern.to_string())?)
        }
        (CompareType::Between, QueryValue::Range(low, high)) => {
            Expected::Range(coerce(&low), coerce(&high))
        }
        (CompareType::Between, QueryValue::List(list)) if list.len() == 2 => {
            Expected::Range(coerce(&list[0]), coerce(&list[1]))
        }
        (CompareType::Between, _) => {
            return Err(TableDbError::Query(
                "between needs a lower and an upper bound".into(),
            ))
        }
        (_, QueryValue::List(list)) => Expected::List(list.iter().map(&coerce).collect()),
        (_, QueryValue::Query(query)) => {
            if comparer.kind == CompareType::Equal {
                comparer = Comparer::new(CompareType::In, comparer.not);
            }
            let values = resolve_sub_query(table, &query)?;
            Expected::List(values.iter().map(&coerce).collect())
        }
        (_, QueryValue::Value(value)) => Expected::Single(coerce(&value)),
        (kind, other) => {
            return Err(TableDbError::Query(format!(
                "unsupported operand {other:?} for {kind:?}"
            )))
        }
    };
    Ok(Prepared::Compare {
        target,
        comparer,
        expected,
    })
}

/// Evaluate a sub-query in memory: its first projected column (the target's
/// primary key when none) over the matching rows.
fn resolve_sub_query(table: &DBTable, query: &QQuery) -> Result<Vec<Value>> {
    let schema = table.schema()?;
    let target = schema.table_or_err(&query.table)?;
    let column = match query.columns.first() {
        Some(name) => target.column_or_err(name)?,
        None => target.primary_key().ok_or_else(|| {
            TableDbError::Query(format!("Sub-query table '{}' has no primary key", target.name()))
        })?,
    };
    let prepared = PreparedQuery::prepare(&target, &query.parameters)?;
    let mut values: Vec<Value> = target
        .select_prepared(&prepared)
        .iter()
        .map(|item| column.value(item.handle()))
        .collect();
    values.sort();
    values.dedup();
    Ok(values)
}

impl DBTable {
    /// Bind parameters to this table's columns.
    pub fn prepare(&self, parameters: &QueryParameters) -> Result<PreparedQuery> {
        PreparedQuery::prepare(self, parameters)
    }

    /// Rows matching `parameters`, in table order.
    pub fn select(&self, parameters: &QueryParameters) -> Result<Vec<Arc<DBItem>>> {
        let prepared = self.prepare(parameters)?;
        Ok(self.select_prepared(&prepared))
    }

    pub fn select_prepared(&self, prepared: &PreparedQuery) -> Vec<Arc<DBItem>> {
        if prepared.is_empty() {
            return self.items();
        }
        if let Some(found) = prepared.index_lookup() {
            let rows = self.rows.read();
            let mut seen = ItemSet::new();
            for item in found {
                if rows.contains_key(&item.handle()) {
                    seen.entry(item.handle()).or_insert(item);
                }
            }
            return seen.into_values().collect();
        }
        let scope = self.rows.read().clone();
        prepared.evaluate(&scope).into_values().collect()
    }

    /// Rows where `column` compares to `value`.
    pub fn select_column(
        &self,
        column: &str,
        comparer: Comparer,
        value: impl Into<Value>,
    ) -> Result<Vec<Arc<DBItem>>> {
        self.select(&QueryParameters::new().and(column, comparer, value))
    }

    pub fn select_one(
        &self,
        column: &str,
        comparer: Comparer,
        value: impl Into<Value>,
    ) -> Result<Option<Arc<DBItem>>> {
        Ok(self.select_column(column, comparer, value)?.into_iter().next())
    }

    /// Rows matching the query filter, sorted by its orders.
    pub fn select_query(&self, query: &QQuery) -> Result<Vec<Arc<DBItem>>> {
        let mut items = self.select(&query.parameters)?;
        if !query.orders.is_empty() {
            ItemComparer::new(self, &query.orders)?.sort(&mut items);
        }
        Ok(items)
    }

    pub fn matches(&self, item: &DBItem, parameters: &QueryParameters) -> Result<bool> {
        Ok(self.prepare(parameters)?.matches(item))
    }

    /// Attached row with the given primary key.
    pub fn find_by_id(&self, id: impl Into<Value>) -> Option<Arc<DBItem>> {
        let primary = self.primary_key()?;
        let id = id.into().coerce(primary.data_type());
        let found = match primary.index() {
            Some(index) => index.get(&id),
            None => self
                .items()
                .into_iter()
                .filter(|item| primary.value(item.handle()) == id)
                .collect(),
        };
        found.into_iter().find(|item| self.contains(item))
    }

    /// Attached row with the given code.
    pub fn find_by_code(&self, code: impl Into<Value>) -> Option<Arc<DBItem>> {
        let column = self.code_key()?;
        self.select_column(column.name(), Comparer::EQUAL, code)
            .ok()?
            .into_iter()
            .next()
    }
}
