use super::Connection;
use crate::error::Result;
use crate::table::{DBItem, TableKind, UpdateState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag checked by long-running loads between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type PendingItems = Arc<Mutex<Vec<Arc<DBItem>>>>;

/// A unit of work over one connection.
///
/// Saving an item never commits: the item is registered here and only
/// accepted (change state reset, deletions detached) when the outermost
/// transaction commits. A committed sub-transaction hands its items to its
/// parent. A rollback leaves every registered item with its pending diff so
/// the save can be retried, and drops the log rows it inserted from memory.
/// Dropping an unfinished transaction rolls it back.
pub struct DBTransaction {
    connection: Arc<dyn Connection>,
    items: PendingItems,
    parent: Option<PendingItems>,
    cancel: CancelToken,
    finished: bool,
}

impl DBTransaction {
    pub fn begin(connection: Arc<dyn Connection>) -> Result<Self> {
        DBTransaction::begin_with(connection, CancelToken::new())
    }

    pub fn begin_with(connection: Arc<dyn Connection>, cancel: CancelToken) -> Result<Self> {
        DBTransaction::open(connection, cancel, None)
    }

    fn open(
        connection: Arc<dyn Connection>,
        cancel: CancelToken,
        parent: Option<PendingItems>,
    ) -> Result<Self> {
        connection.begin()?;
        Ok(DBTransaction {
            connection,
            items: Arc::new(Mutex::new(Vec::new())),
            parent,
            cancel,
            finished: false,
        })
    }

    /// A nested transaction on the same connection. Its items are accepted
    /// only when this transaction commits.
    pub fn sub_transaction(&self) -> Result<DBTransaction> {
        DBTransaction::open(
            self.connection.clone(),
            self.cancel.clone(),
            Some(self.items.clone()),
        )
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn add_item(&self, item: &Arc<DBItem>) {
        push_unique(&mut self.items.lock(), item);
    }

    /// Items saved in this transaction and not yet accepted.
    pub fn items(&self) -> Vec<Arc<DBItem>> {
        self.items.lock().clone()
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if let Err(e) = self.connection.commit() {
            self.reject_items();
            return Err(e);
        }
        let items = std::mem::take(&mut *self.items.lock());
        match &self.parent {
            Some(parent) => {
                let mut parent = parent.lock();
                for item in &items {
                    push_unique(&mut parent, item);
                }
            }
            None => {
                for item in items {
                    item.accept();
                }
            }
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.reject_items();
        self.connection.rollback()
    }

    fn reject_items(&self) {
        let items = std::mem::take(&mut *self.items.lock());
        for item in items {
            item.reject_commit();
            // Log rows only exist for the write they mirror.
            if item.update_state().contains(UpdateState::INSERT) {
                if let Some(table) = item.table().filter(|t| t.kind() == TableKind::Log) {
                    table.remove(&item);
                }
            }
        }
    }
}

fn push_unique(items: &mut Vec<Arc<DBItem>>, item: &Arc<DBItem>) {
    if !items.iter().any(|i| Arc::ptr_eq(i, item)) {
        items.push(item.clone());
    }
}

impl Drop for DBTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("Transaction dropped without commit, rolling back");
        self.reject_items();
        if let Err(e) = self.connection.rollback() {
            log::error!("Rollback failed: {e}");
        }
    }
}
