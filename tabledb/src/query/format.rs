use super::{CompareType, LogicType, ParameterKind, QueryParameters, QueryTarget, QueryValue};
use crate::connection::Dialect;
use crate::value::Value;

pub(super) fn format_parameters(
    parameters: &QueryParameters,
    dialect: &dyn Dialect,
    bindings: &mut Vec<(String, Value)>,
) -> Option<String> {
    format_chain(parameters, dialect, bindings).map(|(text, _)| text)
}

/// Render a parameter chain the way the in-memory filter folds it: each
/// parameter combines with the whole result before it, so the prefix is
/// parenthesized whenever the joining logic changes. The flag is false when
/// an `and` branch was dropped and the text matches a superset of rows.
fn format_chain(
    parameters: &QueryParameters,
    dialect: &dyn Dialect,
    bindings: &mut Vec<(String, Value)>,
) -> Option<(String, bool)> {
    let mark = bindings.len();
    let mut text = String::new();
    let mut exact = true;
    let mut joined: Option<LogicType> = None;
    for parameter in parameters {
        let rendered = match &parameter.kind {
            ParameterKind::Compare {
                target,
                comparer,
                value,
            } => format_compare(target, *comparer, value, dialect, bindings).map(|c| (c, true)),
            ParameterKind::Group(group) => {
                let group_mark = bindings.len();
                match format_chain(group, dialect, bindings) {
                    // Negating a widened group would narrow the server result.
                    Some((_, false)) if parameter.logic.not => {
                        bindings.truncate(group_mark);
                        None
                    }
                    Some((g, group_exact)) => Some((format!("({g})"), group_exact)),
                    None => None,
                }
            }
        };
        match rendered {
            Some((rendered, rendered_exact)) => {
                if text.is_empty() {
                    if parameter.logic.not {
                        text.push_str("not ");
                    }
                } else {
                    if joined.is_some_and(|kind| kind != parameter.logic.kind) {
                        text = format!("({text})");
                    }
                    joined = Some(parameter.logic.kind);
                    text.push(' ');
                    text.push_str(parameter.logic.sql());
                    text.push(' ');
                }
                text.push_str(&rendered);
                exact &= rendered_exact;
            }
            // Dropping an `and` branch widens the server result, which the
            // in-memory filter narrows again. Dropping an `or` branch would lose rows.
            None if parameter.logic.kind == LogicType::And && !text.is_empty() => exact = false,
            None => {
                bindings.truncate(mark);
                return None;
            }
        }
    }
    if text.is_empty() {
        None
    } else {
        Some((text, exact))
    }
}

fn bind(dialect: &dyn Dialect, bindings: &mut Vec<(String, Value)>, value: Value) -> String {
    let name = format!("p{}", bindings.len());
    let placeholder = dialect.format_parameter(&name);
    bindings.push((name, value));
    placeholder
}

fn format_compare(
    target: &QueryTarget,
    comparer: super::Comparer,
    value: &QueryValue,
    dialect: &dyn Dialect,
    bindings: &mut Vec<(String, Value)>,
) -> Option<String> {
    let column = match target {
        QueryTarget::Column(name) => dialect.format_column(name),
        QueryTarget::Computed(_) => return None,
    };
    let (comparer, value) = value.normalize(comparer);
    let operator = comparer.sql();
    match (comparer.kind, value) {
        (CompareType::Is, _) => Some(format!("{column} {operator} null")),
        (CompareType::Equal, QueryValue::Value(Value::Null)) => {
            let operator = if comparer.not { "is not" } else { "is" };
            Some(format!("{column} {operator} null"))
        }
        (CompareType::Between, QueryValue::Range(low, high)) => {
            let low = bind(dialect, bindings, low);
            let high = bind(dialect, bindings, high);
            Some(format!("{column} {operator} {low} and {high}"))
        }
        (_, QueryValue::List(list)) => {
            if list.is_empty() {
                return Some(if comparer.not { "1 = 1" } else { "1 = 0" }.to_string());
            }
            let placeholders = list
                .into_iter()
                .map(|v| bind(dialect, bindings, v))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("{column} {operator} ({placeholders})"))
        }
        (_, QueryValue::Query(query)) => {
            if query.columns.len() != 1 {
                return None;
            }
            let select = query.format_select_text(dialect, bindings);
            let operator = if comparer.not { "not in" } else { "in" };
            Some(format!("{column} {operator} ({select})"))
        }
        (_, QueryValue::Value(v)) => {
            let placeholder = bind(dialect, bindings, v);
            Some(format!("{column} {operator} {placeholder}"))
        }
        (_, QueryValue::Range(..)) | (_, QueryValue::Flags(_)) => None,
    }
}
