//! In-memory reference store.
//!
//! `MemoryStore` keeps named tables of rows and implements `BackingStore`
//! over them. Every mutation notifies the observers registered on that
//! table, including observers registered by the writing process itself.
//! Cursors are materialized copies: a cursor keeps showing the rows it was
//! read with until it is replaced by a fresh query.

use crate::cursor::{BackingStore, ChangeCallback, ObserverId, RowCursor};
use crate::notify::ObserverRegistry;
use crate::selection::{compile_order_by, compile_selection, resolve_column, Predicate};
use hashbrown::HashMap;
use parking_lot::RwLock;
use quarry_core::{columns, Columns, Error, QueryDescriptor, Result, Row, RowId, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A table: declared columns plus rows.
struct Table {
    columns: Columns,
    rows: Vec<(RowId, Vec<Value>)>,
    next_row_id: RowId,
}

struct StoreShared {
    tables: RwLock<HashMap<String, Table>>,
    observers: ObserverRegistry,
    available: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// An in-memory, thread-safe backing store.
///
/// Cloning yields another handle to the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<StoreShared>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                tables: RwLock::new(HashMap::new()),
                observers: ObserverRegistry::new(),
                available: AtomicBool::new(true),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a table with the given columns.
    pub fn create_table<I, S>(&self, name: &str, column_names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = self.shared.tables.write();
        if tables.contains_key(name) {
            return Err(Error::malformed(format!("table already exists: {}", name)));
        }
        tables.insert(
            name.to_string(),
            Table {
                columns: columns(column_names),
                rows: Vec::new(),
                next_row_id: 1,
            },
        );
        Ok(())
    }

    /// Inserts a row and notifies observers of `table`. Returns the row ID.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<RowId> {
        let id = {
            let mut tables = self.shared.tables.write();
            let t = tables
                .get_mut(table)
                .ok_or_else(|| Error::malformed(format!("no such table: {}", table)))?;
            if values.len() != t.columns.len() {
                return Err(Error::malformed(format!(
                    "table {} has {} columns but {} values were given",
                    table,
                    t.columns.len(),
                    values.len()
                )));
            }
            let id = t.next_row_id;
            t.next_row_id += 1;
            t.rows.push((id, values));
            id
        };
        self.shared.observers.notify(table);
        Ok(id)
    }

    /// Sets `column` to `value` on every row matching the selection.
    /// Returns the number of rows updated.
    pub fn update(
        &self,
        table: &str,
        column: &str,
        value: Value,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<usize> {
        let updated = {
            let mut tables = self.shared.tables.write();
            let t = tables
                .get_mut(table)
                .ok_or_else(|| Error::malformed(format!("no such table: {}", table)))?;
            let col = resolve_column(&t.columns, column)?;
            let predicate = compile_optional(selection, &t.columns, args)?;
            let mut updated = 0;
            for (_, values) in t.rows.iter_mut() {
                if predicate.as_ref().map_or(true, |p| p.eval(values)) {
                    values[col] = value.clone();
                    updated += 1;
                }
            }
            updated
        };
        if updated > 0 {
            self.shared.observers.notify(table);
        }
        Ok(updated)
    }

    /// Deletes every row matching the selection. Returns the number removed.
    pub fn delete(&self, table: &str, selection: Option<&str>, args: &[Value]) -> Result<usize> {
        let removed = {
            let mut tables = self.shared.tables.write();
            let t = tables
                .get_mut(table)
                .ok_or_else(|| Error::malformed(format!("no such table: {}", table)))?;
            let predicate = compile_optional(selection, &t.columns, args)?;
            let before = t.rows.len();
            t.rows
                .retain(|(_, values)| !predicate.as_ref().map_or(true, |p| p.eval(values)));
            before - t.rows.len()
        };
        if removed > 0 {
            self.shared.observers.notify(table);
        }
        Ok(removed)
    }

    /// Notifies observers of `target` without changing any data.
    pub fn notify_change(&self, target: &str) -> usize {
        self.shared.observers.notify(target)
    }

    /// Makes the store reachable or unreachable. While unreachable every
    /// query fails with `SourceUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.shared.tables.read().get(table).map(|t| t.rows.len())
    }

    /// Number of cursors handed out so far.
    pub fn opened_cursors(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of cursors closed so far.
    pub fn closed_cursors(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of cursors handed out and not yet closed.
    pub fn live_cursors(&self) -> usize {
        self.opened_cursors().saturating_sub(self.closed_cursors())
    }

    /// Number of change observers registered on `target`.
    pub fn observer_count(&self, target: &str) -> usize {
        self.shared.observers.observer_count(target)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_optional(
    selection: Option<&str>,
    columns: &[String],
    args: &[Value],
) -> Result<Option<Predicate>> {
    match selection {
        Some(expr) => compile_selection(expr, columns, args).map(Some),
        None if !args.is_empty() => Err(Error::malformed(
            "selection arguments given without a selection",
        )),
        None => Ok(None),
    }
}

impl BackingStore for MemoryStore {
    fn query(&self, descriptor: &QueryDescriptor) -> Result<Option<Box<dyn RowCursor>>> {
        let target = descriptor.target();
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(Error::source_unavailable(target, "store is offline"));
        }

        let tables = self.shared.tables.read();
        let table = tables
            .get(target)
            .ok_or_else(|| Error::malformed(format!("no such table: {}", target)))?;

        let predicate = compile_optional(
            descriptor.selection_expr(),
            &table.columns,
            descriptor.selection_args(),
        )?;
        let order_by = descriptor
            .sort_clause()
            .map(|clause| compile_order_by(clause, &table.columns))
            .transpose()?;
        let (out_columns, projection) = match descriptor.projected_columns() {
            Some(names) => {
                let positions = names
                    .iter()
                    .map(|name| resolve_column(&table.columns, name))
                    .collect::<Result<Vec<_>>>()?;
                (columns(names.iter().cloned()), Some(positions))
            }
            None => (table.columns.clone(), None),
        };

        let mut matched: Vec<&(RowId, Vec<Value>)> = table
            .rows
            .iter()
            .filter(|(_, values)| predicate.as_ref().map_or(true, |p| p.eval(values)))
            .collect();
        if let Some(order) = &order_by {
            matched.sort_by(|a, b| order.compare(&a.1, &b.1));
        }
        let rows = matched
            .into_iter()
            .map(|(id, values)| {
                let values = match &projection {
                    Some(positions) => positions.iter().map(|&i| values[i].clone()).collect(),
                    None => values.clone(),
                };
                Row::new(*id, out_columns.clone(), values)
            })
            .collect();
        drop(tables);

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(target = %target, "opened memory cursor");
        Ok(Some(Box::new(MemoryCursor {
            target: target.to_string(),
            rows,
            observers: Vec::new(),
            closed: false,
            store: self.shared.clone(),
        })))
    }
}

/// A materialized cursor handed out by `MemoryStore`.
pub struct MemoryCursor {
    target: String,
    rows: Vec<Row>,
    observers: Vec<ObserverId>,
    closed: bool,
    store: Arc<StoreShared>,
}

impl MemoryCursor {
    fn release_observers(&mut self) {
        for id in self.observers.drain(..) {
            self.store.observers.unregister(&self.target, id);
        }
    }
}

impl RowCursor for MemoryCursor {
    fn count(&self) -> usize {
        if self.closed {
            0
        } else {
            self.rows.len()
        }
    }

    fn row(&mut self, index: usize) -> Result<Row> {
        if self.closed {
            return Err(Error::closed("cursor"));
        }
        self.rows
            .get(index)
            .cloned()
            .ok_or_else(|| Error::row_out_of_range(index, self.rows.len()))
    }

    fn register_observer(&mut self, callback: ChangeCallback) -> ObserverId {
        let id = self.store.observers.register(&self.target, callback);
        self.observers.push(id);
        id
    }

    fn unregister_observer(&mut self, id: ObserverId) {
        if let Some(pos) = self.observers.iter().position(|o| *o == id) {
            self.observers.swap_remove(pos);
            self.store.observers.unregister(&self.target, id);
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.release_observers();
        self.rows.clear();
        self.store.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        // Not counted as closed, so leak checks still see it.
        self.release_observers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn people() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("people", ["name", "age"]).unwrap();
        store.insert("people", vec!["carol".into(), 41.into()]).unwrap();
        store.insert("people", vec!["alice".into(), 30.into()]).unwrap();
        store.insert("people", vec!["bob".into(), 17.into()]).unwrap();
        store
    }

    fn names(cursor: &mut Box<dyn RowCursor>) -> Vec<String> {
        (0..cursor.count())
            .map(|i| cursor.row(i).unwrap().get_str("name").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_query_all_rows() {
        let store = people();
        let mut cursor = store.query(&QueryDescriptor::new("people")).unwrap().unwrap();
        assert_eq!(cursor.count(), 3);
        assert_eq!(names(&mut cursor), vec!["carol", "alice", "bob"]);
        cursor.close().unwrap();
    }

    #[test]
    fn test_query_selection_order_projection() {
        let store = people();
        let q = QueryDescriptor::new("people")
            .projection(["name"])
            .selection("age >= ?")
            .arg(18)
            .sort_order("name");
        let mut cursor = store.query(&q).unwrap().unwrap();
        assert_eq!(names(&mut cursor), vec!["alice", "carol"]);
        assert_eq!(cursor.row(0).unwrap().len(), 1);
        assert!(matches!(cursor.row(2), Err(Error::RowOutOfRange { index: 2, count: 2 })));
    }

    #[test]
    fn test_query_malformed() {
        let store = people();
        let err = store
            .query(&QueryDescriptor::new("nope"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MalformedQuery { .. }));

        let err = store
            .query(&QueryDescriptor::new("people").projection(["height"]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MalformedQuery { .. }));
        assert_eq!(store.opened_cursors(), 0);
    }

    #[test]
    fn test_query_unavailable() {
        let store = people();
        store.set_available(false);
        let err = store.query(&QueryDescriptor::new("people")).err().unwrap();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        store.set_available(true);
        assert!(store.query(&QueryDescriptor::new("people")).is_ok());
    }

    #[test]
    fn test_cursor_close_accounting() {
        let store = people();
        let mut cursor = store.query(&QueryDescriptor::new("people")).unwrap().unwrap();
        assert_eq!(store.live_cursors(), 1);
        cursor.close().unwrap();
        cursor.close().unwrap();
        assert!(cursor.is_closed());
        assert_eq!(store.closed_cursors(), 1);
        assert_eq!(store.live_cursors(), 0);
        assert!(matches!(cursor.row(0), Err(Error::ResourceClosed { .. })));
        assert_eq!(cursor.count(), 0);
    }

    #[test]
    fn test_cursor_observers_see_own_writes() {
        let store = people();
        let mut cursor = store.query(&QueryDescriptor::new("people")).unwrap().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = cursor.register_observer(Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        store.insert("people", vec!["dave".into(), 52.into()]).unwrap();
        store.update("people", "age", 18.into(), Some("name = ?"), &["bob".into()]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // The cursor keeps its materialized rows.
        assert_eq!(cursor.count(), 3);

        cursor.unregister_observer(id);
        store.notify_change("people");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cursor_close_releases_observers() {
        let store = people();
        let mut cursor = store.query(&QueryDescriptor::new("people")).unwrap().unwrap();
        cursor.register_observer(Arc::new(|| {}));
        assert_eq!(store.observer_count("people"), 1);
        cursor.close().unwrap();
        assert_eq!(store.observer_count("people"), 0);
    }

    #[test]
    fn test_dropped_cursor_is_not_counted_closed() {
        let store = people();
        {
            let mut cursor = store.query(&QueryDescriptor::new("people")).unwrap().unwrap();
            cursor.register_observer(Arc::new(|| {}));
        }
        assert_eq!(store.observer_count("people"), 0);
        assert_eq!(store.live_cursors(), 1);
    }

    #[test]
    fn test_update_and_delete() {
        let store = people();
        assert_eq!(store.update("people", "age", 0.into(), None, &[]).unwrap(), 3);
        assert_eq!(store.delete("people", Some("name != ?"), &["alice".into()]).unwrap(), 2);
        assert_eq!(store.row_count("people"), Some(1));
        assert!(store.delete("people", None, &["x".into()]).is_err());
        assert!(store.insert("people", vec!["too few".into()]).is_err());
        assert!(store.create_table("people", ["x"]).is_err());
    }
}
