//! Client-side table cache shared by the link implementations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::link::{EventContext, RowCallback, RowValue, TableHandle, UpdateCallback};

/// Rows of one source table plus the callbacks registered on it.
///
/// Rows are a multiset compared by value. Callbacks are invoked after the
/// row lock is released, so a callback may read the table.
#[derive(Default)]
pub struct TableCache {
    name: String,
    rows: Mutex<Vec<RowValue>>,
    inserts: Mutex<Vec<RowCallback>>,
    updates: Mutex<Vec<UpdateCallback>>,
    deletes: Mutex<Vec<RowCallback>>,
}

impl TableCache {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Replace all rows without firing callbacks (subscription snapshot).
    pub fn replace_rows(&self, rows: Vec<RowValue>) {
        *self.rows.lock() = rows;
    }

    /// Insert a row and fire insert callbacks.
    pub fn apply_insert(&self, ctx: &EventContext, row: RowValue) {
        self.rows.lock().push(row.clone());
        let callbacks = self.inserts.lock().clone();
        for cb in &callbacks {
            cb(ctx, &row);
        }
    }

    /// Replace `old` with `new` and fire update callbacks.
    pub fn apply_update(&self, ctx: &EventContext, old: RowValue, new: RowValue) {
        {
            let mut rows = self.rows.lock();
            match rows.iter_mut().find(|r| **r == old) {
                Some(slot) => slot.clone_from(&new),
                None => rows.push(new.clone()),
            }
        }
        let callbacks = self.updates.lock().clone();
        for cb in &callbacks {
            cb(ctx, &old, &new);
        }
    }

    /// Remove one matching row and fire delete callbacks.
    pub fn apply_delete(&self, ctx: &EventContext, row: RowValue) {
        {
            let mut rows = self.rows.lock();
            if let Some(pos) = rows.iter().position(|r| *r == row) {
                rows.swap_remove(pos);
            }
        }
        let callbacks = self.deletes.lock().clone();
        for cb in &callbacks {
            cb(ctx, &row);
        }
    }
}

impl TableHandle for TableCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn rows(&self) -> Vec<RowValue> {
        self.rows.lock().clone()
    }

    fn on_insert(&self, callback: RowCallback) {
        self.inserts.lock().push(callback);
    }

    fn on_update(&self, callback: UpdateCallback) {
        self.updates.lock().push(callback);
    }

    fn on_delete(&self, callback: RowCallback) {
        self.deletes.lock().push(callback);
    }
}

/// Named tables of one link.
#[derive(Default)]
pub struct TableSet {
    tables: Mutex<HashMap<String, Arc<TableCache>>>,
}

impl TableSet {
    /// Fetch a table, creating it empty on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<TableCache> {
        Arc::clone(
            self.tables
                .lock()
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TableCache::new(name))),
        )
    }

    /// Fetch an existing table.
    pub fn get(&self, name: &str) -> Option<Arc<TableCache>> {
        self.tables.lock().get(name).cloned()
    }
}
