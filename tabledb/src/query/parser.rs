use super::{
    Comparer, Logic, LogicType, ParameterKind, QQuery, QueryParameter, QueryParameters,
    QueryTarget, QueryValue,
};
use crate::error::{Result, TableDbError};
use crate::value::Value;
use sqlparser::ast::{
    BinaryOperator, Expr, Query, SelectItem, SetExpr, Statement, TableFactor, UnaryOperator,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parse a SQL `WHERE` fragment into query parameters.
pub fn parse_filter(filter: &str) -> Result<QueryParameters> {
    let sql = format!("SELECT * FROM t WHERE {filter}");
    let statements = Parser::parse_sql(&GenericDialect {}, &sql)
        .map_err(|e| TableDbError::SqlParse(format!("Filter '{filter}': {e}")))?;

    let selection = match statements.first() {
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select.selection.clone(),
            _ => None,
        },
        _ => None,
    };
    let expr = selection.ok_or_else(|| {
        TableDbError::SqlParse(format!("Filter '{filter}': no condition found"))
    })?;

    let mut parameters = QueryParameters::new();
    convert(&expr, Logic::AND, &mut parameters)?;
    Ok(parameters)
}

/// Append `expr` to `out`, flattening left-associative `and`/`or` chains.
fn convert(expr: &Expr, logic: Logic, out: &mut QueryParameters) -> Result<()> {
    match expr {
        Expr::BinaryOp {
            left,
            op: op @ (BinaryOperator::And | BinaryOperator::Or),
            right,
        } => {
            let kind = if *op == BinaryOperator::And {
                LogicType::And
            } else {
                LogicType::Or
            };
            convert(left, logic, out)?;
            push_branch(right, Logic::new(kind, false), out)
        }
        Expr::Nested(inner) => push_group(inner, logic, out),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => push_group(expr, logic.negate(), out),
        _ => {
            out.push(convert_compare(expr, logic)?);
            Ok(())
        }
    }
}

/// The right side of a logic operator. A nested chain there binds tighter
/// than the operator, so it becomes a group.
fn push_branch(expr: &Expr, logic: Logic, out: &mut QueryParameters) -> Result<()> {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::And | BinaryOperator::Or,
            ..
        } => push_group(expr, logic, out),
        _ => convert(expr, logic, out),
    }
}

fn push_group(expr: &Expr, logic: Logic, out: &mut QueryParameters) -> Result<()> {
    let mut group = QueryParameters::new();
    convert(expr, Logic::AND, &mut group)?;
    if group.len() == 1 {
        if let Some(mut single) = group.items.pop() {
            if single.logic.not {
                // `not (not x)` and friends keep their own negation inside a group.
                out.push(QueryParameter {
                    logic,
                    kind: ParameterKind::Group(QueryParameters { items: vec![single] }),
                });
            } else {
                single.logic = logic;
                out.push(single);
            }
            return Ok(());
        }
    }
    out.push(QueryParameter {
        logic,
        kind: ParameterKind::Group(group),
    });
    Ok(())
}

fn convert_compare(expr: &Expr, logic: Logic) -> Result<QueryParameter> {
    let (target, comparer, value) = match expr {
        Expr::BinaryOp { left, op, right } => {
            let comparer = match op {
                BinaryOperator::Eq => Comparer::EQUAL,
                BinaryOperator::NotEq => Comparer::NOT_EQUAL,
                BinaryOperator::Gt => Comparer::GREATER,
                BinaryOperator::GtEq => Comparer::GREATER_OR_EQUAL,
                BinaryOperator::Lt => Comparer::LESS,
                BinaryOperator::LtEq => Comparer::LESS_OR_EQUAL,
                other => return Err(unsupported(&format!("operator {other}"))),
            };
            match (column_name(left), column_name(right)) {
                (Some(column), _) => (column, comparer, QueryValue::Value(literal(right)?)),
                (None, Some(column)) => (column, comparer.mirror(), QueryValue::Value(literal(left)?)),
                (None, None) => return Err(unsupported(&format!("{expr}"))),
            }
        }
        Expr::Like {
            negated,
            expr: target,
            pattern,
            ..
        }
        | Expr::ILike {
            negated,
            expr: target,
            pattern,
            ..
        } => (
            require_column(target)?,
            Comparer::new(super::CompareType::Like, *negated),
            QueryValue::Value(literal(pattern)?),
        ),
        Expr::InList {
            expr: target,
            list,
            negated,
        } => {
            let values = list.iter().map(literal).collect::<Result<Vec<_>>>()?;
            (
                require_column(target)?,
                Comparer::new(super::CompareType::In, *negated),
                QueryValue::List(values),
            )
        }
        Expr::InSubquery {
            expr: target,
            subquery,
            negated,
        } => (
            require_column(target)?,
            Comparer::new(super::CompareType::In, *negated),
            QueryValue::Query(Box::new(convert_sub_query(subquery)?)),
        ),
        Expr::Between {
            expr: target,
            negated,
            low,
            high,
        } => (
            require_column(target)?,
            Comparer::new(super::CompareType::Between, *negated),
            QueryValue::Range(literal(low)?, literal(high)?),
        ),
        Expr::IsNull(target) => (
            require_column(target)?,
            Comparer::IS,
            QueryValue::Value(Value::Null),
        ),
        Expr::IsNotNull(target) => (
            require_column(target)?,
            Comparer::IS_NOT,
            QueryValue::Value(Value::Null),
        ),
        other => return Err(unsupported(&format!("{other}"))),
    };
    Ok(QueryParameter {
        logic,
        kind: ParameterKind::Compare {
            target: QueryTarget::Column(target),
            comparer,
            value,
        },
    })
}

fn convert_sub_query(query: &Query) -> Result<QQuery> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported("sub-query body"));
    };
    let table = select
        .from
        .first()
        .and_then(|from| match &from.relation {
            TableFactor::Table { name, .. } => name.0.last().map(|i| i.value.clone()),
            _ => None,
        })
        .ok_or_else(|| unsupported("sub-query without table"))?;

    let mut sub = QQuery::new(&table);
    for item in &select.projection {
        if let SelectItem::UnnamedExpr(expr) = item {
            if let Some(column) = column_name(expr) {
                sub = sub.column(&column);
            }
        }
    }
    if let Some(selection) = &select.selection {
        convert(selection, Logic::AND, &mut sub.parameters)?;
    }
    Ok(sub)
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|p| p.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

fn require_column(expr: &Expr) -> Result<String> {
    column_name(expr).ok_or_else(|| unsupported(&format!("{expr}")))
}

fn literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Value(value) => Ok(match value {
            sqlparser::ast::Value::Number(n, _) => match n.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => n
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| unsupported(n))?,
            },
            sqlparser::ast::Value::SingleQuotedString(s)
            | sqlparser::ast::Value::DoubleQuotedString(s) => Value::Text(s.clone()),
            sqlparser::ast::Value::Boolean(b) => Value::Bool(*b),
            sqlparser::ast::Value::Null => Value::Null,
            other => return Err(unsupported(&format!("{other}"))),
        }),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Real(f) => Ok(Value::Real(-f)),
            _ => Err(unsupported(&format!("-{expr}"))),
        },
        Expr::Nested(inner) => literal(inner),
        other => Err(unsupported(&format!("{other}"))),
    }
}

fn unsupported(what: &str) -> TableDbError {
    TableDbError::SqlParse(format!("Unsupported filter expression: {what}"))
}
