use crate::query::{CompareType, Comparer};
use crate::table::DBItem;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// In-memory secondary index over one column: value → attached items.
#[derive(Debug, Default)]
pub struct PullIndex {
    entries: RwLock<BTreeMap<Value, Vec<Arc<DBItem>>>>,
}

impl PullIndex {
    pub fn new() -> Self {
        PullIndex::default()
    }

    pub fn add(&self, value: Value, item: &Arc<DBItem>) {
        let mut entries = self.entries.write();
        let bucket = entries.entry(value).or_default();
        if !bucket.iter().any(|i| Arc::ptr_eq(i, item)) {
            bucket.push(item.clone());
        }
    }

    pub fn remove(&self, value: &Value, item: &Arc<DBItem>) {
        let mut entries = self.entries.write();
        let emptied = match entries.get_mut(value) {
            Some(bucket) => {
                bucket.retain(|i| !Arc::ptr_eq(i, item));
                bucket.is_empty()
            }
            None => false,
        };
        if emptied {
            entries.remove(value);
        }
    }

    /// Move an item from the bucket of `old` to the bucket of `new`.
    pub fn update(&self, old: &Value, new: Value, item: &Arc<DBItem>) {
        if *old == new {
            return;
        }
        self.remove(old, item);
        self.add(new, item);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn get(&self, value: &Value) -> Vec<Arc<DBItem>> {
        self.entries.read().get(value).cloned().unwrap_or_default()
    }

    pub fn first(&self, value: &Value) -> Option<Arc<DBItem>> {
        self.entries
            .read()
            .get(value)
            .and_then(|bucket| bucket.first().cloned())
    }

    /// Whether a comparer can be answered from the index alone.
    pub fn supports(comparer: Comparer) -> bool {
        matches!(
            comparer.kind,
            CompareType::Equal
                | CompareType::In
                | CompareType::Is
                | CompareType::Greater
                | CompareType::GreaterOrEqual
                | CompareType::Less
                | CompareType::LessOrEqual
                | CompareType::Between
        ) && !comparer.not
    }

    /// Look up items for a positive comparison. `values` holds one value for
    /// scalar comparers, the list for `In` and `[low, high]` for `Between`.
    pub fn select(&self, comparer: Comparer, values: &[Value]) -> Vec<Arc<DBItem>> {
        let entries = self.entries.read();
        let mut result = Vec::new();
        let mut extend = |bucket: &Vec<Arc<DBItem>>| result.extend(bucket.iter().cloned());
        match comparer.kind {
            CompareType::Equal | CompareType::In => {
                for value in values {
                    if let Some(bucket) = entries.get(value) {
                        extend(bucket);
                    }
                }
            }
            CompareType::Is => {
                if let Some(bucket) = entries.get(&Value::Null) {
                    extend(bucket);
                }
            }
            CompareType::Greater | CompareType::GreaterOrEqual => {
                if let Some(value) = values.first() {
                    let lower = if comparer.kind == CompareType::Greater {
                        Bound::Excluded(value)
                    } else {
                        Bound::Included(value)
                    };
                    for (key, bucket) in entries.range::<Value, _>((lower, Bound::Unbounded)) {
                        if !key.is_null() {
                            extend(bucket);
                        }
                    }
                }
            }
            CompareType::Less | CompareType::LessOrEqual => {
                if let Some(value) = values.first() {
                    let upper = if comparer.kind == CompareType::Less {
                        Bound::Excluded(value)
                    } else {
                        Bound::Included(value)
                    };
                    for (key, bucket) in entries.range::<Value, _>((Bound::Unbounded, upper)) {
                        if !key.is_null() {
                            extend(bucket);
                        }
                    }
                }
            }
            CompareType::Between => {
                if let [low, high] = values {
                    if low <= high {
                        for (key, bucket) in entries.range::<Value, _>((
                            Bound::Included(low),
                            Bound::Included(high),
                        )) {
                            if !key.is_null() {
                                extend(bucket);
                            }
                        }
                    }
                }
            }
            CompareType::Like => {}
        }
        result
    }
}
