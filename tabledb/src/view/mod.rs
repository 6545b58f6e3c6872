//! Live, sorted and filtered projections over a table's rows.
//!
//! A view listens to its table and keeps its ordered item list current one
//! change at a time. A full recompute only happens through
//! [`DBTableView::update_filter`].

use crate::error::Result;
use crate::query::{QQuery, QueryOrder, QueryParameters};
use crate::schema::DBColumn;
use crate::table::{DBItem, DBTable, ItemChange, ItemListener, LoadParam, PreparedQuery};
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViewMode: u8 {
        /// Keep an own row buffer instead of deriving rows from the table.
        const STATIC = 1 << 0;
        /// Start without rows.
        const EMPTY = 1 << 1;
        /// Apply the access filter.
        const ACCESS = 1 << 2;
    }
}

impl Default for ViewMode {
    fn default() -> Self {
        ViewMode::empty()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViewState: u8 {
        /// Reconciled with the backing store at least once.
        const SYNCH = 1 << 0;
        /// Filter updates and notifications are suppressed.
        const LOCK = 1 << 1;
    }
}

/// Row-level access predicate used by views in [`ViewMode::ACCESS`].
pub type AccessFilter = Arc<dyn Fn(&DBItem) -> bool + Send + Sync>;

/// Orders items by a list of columns. Ties are broken by storage handle so
/// that two distinct items never compare equal.
#[derive(Clone, Default)]
pub struct ItemComparer {
    orders: Vec<(Arc<DBColumn>, bool)>,
}

impl ItemComparer {
    pub fn new(table: &DBTable, orders: &[QueryOrder]) -> Result<Self> {
        let orders = orders
            .iter()
            .map(|o| Ok((table.column_or_err(&o.column)?, o.descending)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ItemComparer { orders })
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn compare(&self, a: &DBItem, b: &DBItem) -> Ordering {
        for (column, descending) in &self.orders {
            let ordering = column.value(a.handle()).cmp(&column.value(b.handle()));
            let ordering = if *descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        a.handle().cmp(&b.handle())
    }

    pub fn sort(&self, items: &mut [Arc<DBItem>]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

impl std::fmt::Debug for ItemComparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.orders.iter().map(|(c, d)| (c.name(), *d)))
            .finish()
    }
}

struct ViewFilter {
    parameters: QueryParameters,
    prepared: PreparedQuery,
}

pub struct DBTableView {
    table: Arc<DBTable>,
    mode: ViewMode,
    state: Mutex<ViewState>,
    filter: RwLock<ViewFilter>,
    comparer: RwLock<ItemComparer>,
    access: RwLock<Option<AccessFilter>>,
    items: RwLock<Vec<Arc<DBItem>>>,
}

impl DBTableView {
    /// Create a view and register it with the table. Unless `mode` holds
    /// [`ViewMode::EMPTY`] the view is filled from the cached rows.
    pub fn new(
        table: Arc<DBTable>,
        parameters: QueryParameters,
        mode: ViewMode,
    ) -> Result<Arc<Self>> {
        let prepared = table.prepare(&parameters)?;
        let view = Arc::new(DBTableView {
            table,
            mode,
            state: Mutex::new(ViewState::LOCK),
            filter: RwLock::new(ViewFilter {
                parameters,
                prepared,
            }),
            comparer: RwLock::new(ItemComparer::default()),
            access: RwLock::new(None),
            items: RwLock::new(Vec::new()),
        });
        let listener: Weak<dyn ItemListener> = Arc::downgrade(&view) as Weak<dyn ItemListener>;
        view.table.add_listener(listener);
        view.state.lock().remove(ViewState::LOCK);
        if !mode.contains(ViewMode::EMPTY) {
            view.refill();
        }
        Ok(view)
    }

    /// Create a view from a filter string such as `status = 'Paid'`.
    pub fn with_filter(table: Arc<DBTable>, filter: &str, mode: ViewMode) -> Result<Arc<Self>> {
        DBTableView::new(table, QueryParameters::parse(filter)?, mode)
    }

    pub fn table(&self) -> &Arc<DBTable> {
        &self.table
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn state(&self) -> ViewState {
        *self.state.lock()
    }

    pub fn is_synchronized(&self) -> bool {
        self.state().contains(ViewState::SYNCH)
    }

    pub fn parameters(&self) -> QueryParameters {
        self.filter.read().parameters.clone()
    }

    /// Snapshot of the rows in view order.
    pub fn items(&self) -> Vec<Arc<DBItem>> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, position: usize) -> Option<Arc<DBItem>> {
        self.items.read().get(position).cloned()
    }

    pub fn contains(&self, item: &DBItem) -> bool {
        self.position(item).is_some()
    }

    pub fn position(&self, item: &DBItem) -> Option<usize> {
        let comparer = self.comparer.read();
        find(&self.items.read(), &comparer, item)
    }

    /// Replace the filter and recompute the rows.
    pub fn set_filter(&self, parameters: QueryParameters) -> Result<()> {
        let prepared = self.table.prepare(&parameters)?;
        *self.filter.write() = ViewFilter {
            parameters,
            prepared,
        };
        self.update_filter();
        Ok(())
    }

    pub fn set_sort(&self, orders: &[QueryOrder]) -> Result<()> {
        let comparer = ItemComparer::new(&self.table, orders)?;
        comparer.sort(&mut self.items.write());
        *self.comparer.write() = comparer;
        Ok(())
    }

    /// Install the row-level access predicate. Only consulted in
    /// [`ViewMode::ACCESS`].
    pub fn set_access_filter(&self, filter: impl Fn(&DBItem) -> bool + Send + Sync + 'static) {
        *self.access.write() = Some(Arc::new(filter));
        self.update_filter();
    }

    pub fn lock(&self) {
        self.state.lock().insert(ViewState::LOCK);
    }

    /// Release the lock and bring the rows up to date.
    pub fn unlock(&self) {
        self.state.lock().remove(ViewState::LOCK);
        self.update_filter();
    }

    fn is_locked(&self) -> bool {
        self.state().contains(ViewState::LOCK)
    }

    /// Recompute the rows. A static view refilters its own buffer; any other
    /// view selects from the table again. Nothing happens while locked.
    pub fn update_filter(&self) {
        if self.is_locked() {
            return;
        }
        if self.mode.contains(ViewMode::STATIC) {
            let buffer = self.items();
            let kept: Vec<_> = buffer.into_iter().filter(|i| self.accepts(i)).collect();
            self.replace(kept);
        } else {
            self.refill();
        }
    }

    fn refill(&self) {
        let selected = self.table.select_prepared(&self.filter.read().prepared);
        let selected = selected.into_iter().filter(|i| self.access_allows(i)).collect();
        self.replace(selected);
    }

    fn replace(&self, mut items: Vec<Arc<DBItem>>) {
        self.comparer.read().sort(&mut items);
        *self.items.write() = items;
    }

    /// Load the view's rows from the backing store.
    pub fn load(&self, param: LoadParam) -> Result<Option<Vec<Arc<DBItem>>>> {
        let query = QQuery::new(self.table.name()).with_parameters(self.parameters());
        let loaded = self.table.load(&query, param, Some(self))?;
        if loaded.is_some() {
            self.state.lock().insert(ViewState::SYNCH);
        }
        Ok(loaded)
    }

    fn access_allows(&self, item: &DBItem) -> bool {
        if !self.mode.contains(ViewMode::ACCESS) {
            return true;
        }
        match &*self.access.read() {
            Some(filter) => filter(item),
            None => true,
        }
    }

    fn accepts(&self, item: &DBItem) -> bool {
        self.filter.read().prepared.matches(item) && self.access_allows(item)
    }

    /// A row read by a load on behalf of this view. Only static views keep
    /// loaded rows themselves; others receive them through notifications.
    pub(crate) fn add_loaded(&self, item: &Arc<DBItem>) {
        if !self.mode.contains(ViewMode::STATIC) || !self.accepts(item) {
            return;
        }
        let comparer = self.comparer.read();
        let mut items = self.items.write();
        if find(&items, &comparer, item).is_none() {
            let at = insert_position(&items, &comparer, item);
            items.insert(at, item.clone());
        }
    }

    pub(crate) fn remove(&self, item: &DBItem) -> bool {
        let comparer = self.comparer.read();
        let mut items = self.items.write();
        match find(&items, &comparer, item) {
            Some(at) => {
                items.remove(at);
                true
            }
            None => false,
        }
    }
}

impl ItemListener for DBTableView {
    fn on_item_changed(&self, item: &Arc<DBItem>, change: &ItemChange) {
        if self.is_locked() {
            return;
        }
        let belongs = !matches!(change, ItemChange::Removed)
            && self.table.contains(item)
            && self.accepts(item);
        let comparer = self.comparer.read();
        let mut items = self.items.write();
        match (find(&items, &comparer, item), belongs) {
            (Some(at), false) => {
                items.remove(at);
            }
            (Some(at), true) => {
                let item = items.remove(at);
                let to = insert_position(&items, &comparer, &item);
                items.insert(to, item);
            }
            (None, true) if !self.mode.contains(ViewMode::STATIC) => {
                let to = insert_position(&items, &comparer, item);
                items.insert(to, item.clone());
            }
            _ => {}
        }
    }
}

impl Drop for DBTableView {
    fn drop(&mut self) {
        self.table.prune_listeners();
    }
}

/// Position of `item`. Binary search finds it while its sort values are
/// unchanged; after an edit the scan by identity does.
fn find(items: &[Arc<DBItem>], comparer: &ItemComparer, item: &DBItem) -> Option<usize> {
    match items.binary_search_by(|probe| comparer.compare(probe, item)) {
        Ok(at) if std::ptr::eq(&*items[at], item) => Some(at),
        _ => items.iter().position(|i| std::ptr::eq(&**i, item)),
    }
}

fn insert_position(items: &[Arc<DBItem>], comparer: &ItemComparer, item: &DBItem) -> usize {
    items
        .binary_search_by(|probe| comparer.compare(probe, item))
        .unwrap_or_else(|at| at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::orders_table;
    use crate::value::Value;

    fn order(table: &Arc<DBTable>, id: i64, status: &str, amount: f64) -> Arc<DBItem> {
        let item = table.new_item();
        item.set("id", id).unwrap();
        item.set("status", status).unwrap();
        item.set("amount", amount).unwrap();
        table.add(&item).unwrap();
        item
    }

    fn ids(view: &DBTableView) -> Vec<i64> {
        view.items()
            .iter()
            .filter_map(|i| i.primary_id().as_i64())
            .collect()
    }

    fn by_amount() -> Vec<QueryOrder> {
        vec![QueryOrder {
            column: "amount".into(),
            descending: false,
        }]
    }

    #[test]
    fn test_view_filters_and_sorts() {
        let (_schema, table) = orders_table();
        order(&table, 1, "Paid", 30.0);
        order(&table, 2, "New", 10.0);
        order(&table, 3, "Paid", 20.0);

        let view = DBTableView::with_filter(table.clone(), "status = 'Paid'", ViewMode::empty())
            .unwrap();
        view.set_sort(&by_amount()).unwrap();
        assert_eq!(ids(&view), vec![3, 1]);
    }

    #[test]
    fn test_edits_are_applied_incrementally() {
        let (_schema, table) = orders_table();
        let first = order(&table, 1, "Paid", 30.0);
        let second = order(&table, 2, "New", 10.0);
        let view = DBTableView::with_filter(table.clone(), "status = 'Paid'", ViewMode::empty())
            .unwrap();
        view.set_sort(&by_amount()).unwrap();

        second.set("status", "Paid").unwrap();
        assert_eq!(ids(&view), vec![2, 1]);

        // Reposition after a sort value changed.
        second.set("amount", 50.0).unwrap();
        assert_eq!(ids(&view), vec![1, 2]);

        first.set("status", "Void").unwrap();
        assert_eq!(ids(&view), vec![2]);

        table.remove(&second);
        assert!(view.is_empty());
    }

    #[test]
    fn test_new_rows_join_live_views_only() {
        let (_schema, table) = orders_table();
        let live = DBTableView::new(table.clone(), QueryParameters::new(), ViewMode::empty())
            .unwrap();
        let fixed = DBTableView::new(table.clone(), QueryParameters::new(), ViewMode::STATIC)
            .unwrap();
        order(&table, 1, "New", 1.0);
        assert_eq!(live.len(), 1);
        assert_eq!(fixed.len(), 0);

        fixed.add_loaded(&table.items()[0]);
        assert_eq!(fixed.len(), 1);
        assert!(fixed.remove(&table.items()[0]));
    }

    #[test]
    fn test_empty_mode_and_lock() {
        let (_schema, table) = orders_table();
        order(&table, 1, "New", 1.0);
        let view = DBTableView::new(table.clone(), QueryParameters::new(), ViewMode::EMPTY)
            .unwrap();
        assert!(view.is_empty());

        view.lock();
        order(&table, 2, "New", 2.0);
        view.update_filter();
        assert!(view.is_empty());
        view.unlock();
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_access_filter() {
        let (_schema, table) = orders_table();
        order(&table, 1, "New", 5.0);
        order(&table, 2, "New", 500.0);
        let view = DBTableView::new(table.clone(), QueryParameters::new(), ViewMode::ACCESS)
            .unwrap();
        assert_eq!(view.len(), 2);
        view.set_access_filter(|item| item.get("amount") < Value::Real(100.0));
        assert_eq!(ids(&view), vec![1]);
    }

    #[test]
    fn test_dropped_view_is_pruned() {
        let (_schema, table) = orders_table();
        let view = DBTableView::new(table.clone(), QueryParameters::new(), ViewMode::empty())
            .unwrap();
        drop(view);
        order(&table, 1, "New", 1.0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_comparer_breaks_ties_by_handle() {
        let (_schema, table) = orders_table();
        let a = order(&table, 1, "New", 1.0);
        let b = order(&table, 2, "New", 1.0);
        let comparer = ItemComparer::new(&table, &by_amount()).unwrap();
        assert_eq!(comparer.compare(&a, &b), a.handle().cmp(&b.handle()));
        assert!(ItemComparer::new(
            &table,
            &[QueryOrder {
                column: "missing".into(),
                descending: true
            }]
        )
        .is_err());
    }
}
