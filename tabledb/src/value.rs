use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    #[default]
    Integer,
    Real,
    Text,
    Blob,
    DateTime,
}

impl DataType {
    /// Stable one-byte tag used by the snapshot format.
    pub fn tag(self) -> u8 {
        match self {
            DataType::Bool => 1,
            DataType::Integer => 2,
            DataType::Real => 3,
            DataType::Text => 4,
            DataType::Blob => 5,
            DataType::DateTime => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => DataType::Bool,
            2 => DataType::Integer,
            3 => DataType::Real,
            4 => DataType::Text,
            5 => DataType::Blob,
            6 => DataType::DateTime,
            _ => return None,
        })
    }
}

/// A single cell value.
///
/// Values form a total order: first by variant rank, then by payload. Reals are
/// ordered with `f64::total_cmp`, so the order is usable as an index key.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Real(_) => 3,
            Value::Text(_) => 4,
            Value::Blob(_) => 5,
            Value::DateTime(_) => 6,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Real(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(d) => Some(*d),
            Value::Text(s) => parse_datetime(s),
            Value::Int(n) => Utc.timestamp_opt(*n, 0).single(),
            _ => None,
        }
    }

    /// Convert the value into the representation of `data_type`.
    /// Values that cannot be converted become `Null`.
    pub fn coerce(&self, data_type: DataType) -> Value {
        if self.is_null() {
            return Value::Null;
        }
        match data_type {
            DataType::Bool => match self {
                Value::Bool(b) => Value::Bool(*b),
                Value::Int(n) => Value::Bool(*n != 0),
                Value::Real(f) => Value::Bool(*f != 0.0),
                Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Value::Bool(true),
                    "false" | "0" | "no" => Value::Bool(false),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
            DataType::Integer => match self {
                Value::DateTime(d) => Value::Int(d.timestamp()),
                Value::Real(f) if f.fract() != 0.0 => Value::Int(f.round() as i64),
                other => other.as_i64().map(Value::Int).unwrap_or(Value::Null),
            },
            DataType::Real => match self {
                Value::Bool(b) => Value::Real(if *b { 1.0 } else { 0.0 }),
                other => other.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            DataType::Text => match self {
                Value::Text(s) => Value::Text(s.clone()),
                Value::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
                other => Value::Text(other.to_string()),
            },
            DataType::Blob => match self {
                Value::Blob(b) => Value::Blob(b.clone()),
                Value::Text(s) => Value::Blob(s.as_bytes().to_vec()),
                _ => Value::Null,
            },
            DataType::DateTime => self.as_datetime().map(Value::DateTime).unwrap_or(Value::Null),
        }
    }

    /// Infer the data type a freshly discovered column should get from a value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null | Value::Text(_) => DataType::Text,
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Integer,
            Value::Real(_) => DataType::Real,
            Value::Blob(_) => DataType::Blob,
            Value::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => {
                serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect())
            }
            Value::DateTime(d) => serde_json::Value::String(d.to_rfc3339()),
        }
    }

    pub fn from_json(json: &serde_json::Value, data_type: DataType) -> Value {
        let raw = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::Blob(
                items
                    .iter()
                    .filter_map(|x| x.as_u64().map(|b| b as u8))
                    .collect(),
            ),
            serde_json::Value::Object(_) => Value::Text(json.to_string()),
        };
        raw.coerce(data_type)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&d));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Utc.from_utc_datetime(&d))
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Real(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::DateTime(d) => d.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::DateTime(d) => f.write_str(&d.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_text_to_numbers() {
        assert_eq!(Value::from("42").coerce(DataType::Integer), Value::Int(42));
        assert_eq!(Value::from("2.5").coerce(DataType::Real), Value::Real(2.5));
        assert_eq!(Value::from("abc").coerce(DataType::Integer), Value::Null);
        assert_eq!(Value::Int(1).coerce(DataType::Bool), Value::Bool(true));
    }

    #[test]
    fn test_coerce_datetime() {
        let v = Value::from("2026-02-13").coerce(DataType::DateTime);
        let d = v.as_datetime().unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2026-02-13");

        let text = v.coerce(DataType::Text);
        assert_eq!(text.coerce(DataType::DateTime), v);
    }

    #[test]
    fn test_total_order() {
        let mut values = vec![
            Value::from("b"),
            Value::Int(3),
            Value::Null,
            Value::Int(-1),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int(-1),
                Value::Int(3),
                Value::from("a"),
                Value::from("b"),
            ]
        );
        assert!(Value::Real(f64::NAN) == Value::Real(f64::NAN));
    }

    #[test]
    fn test_json_round_trip_keeps_type() {
        let v = Value::Int(7);
        assert_eq!(Value::from_json(&v.to_json(), DataType::Integer), v);
        assert_eq!(
            Value::from_json(&serde_json::json!("7"), DataType::Integer),
            Value::Int(7)
        );
    }
}
