//! Shared helpers for the reactive integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use quarry_core::{columns, Error, QueryDescriptor, Result, Row, Value};
use quarry_reactive::{Delivery, FetchExecutor, LifetimeScope, ManualPool, ReactiveQuery};
use quarry_storage::{BackingStore, ChangeCallback, ObserverId, ObserverRegistry, RowCursor};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("quarry_reactive=debug")
        .try_init();
}

/// What the next query against a `ScriptedStore` returns.
#[derive(Clone, Debug)]
pub enum Reply {
    Rows(Vec<i64>),
    NoData,
    Fail(Error),
    /// Rows whose cursor fails to close.
    BrokenClose(Vec<i64>),
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// A store that answers from a script and counts cursor opens and closes.
///
/// With an empty script it answers `Rows(vec![])`.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    script: Arc<Mutex<VecDeque<Reply>>>,
    counters: Arc<Counters>,
    observers: Arc<ObserverRegistry>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn notify(&self, target: &str) -> usize {
        self.observers.notify(target)
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self, target: &str) -> usize {
        self.observers.observer_count(target)
    }

    fn cursor(&self, target: &str, values: Vec<i64>, close_fails: bool) -> Box<dyn RowCursor> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let cols = columns(["n"]);
        let rows = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Row::new(i as u64 + 1, cols.clone(), vec![Value::Integer(v)]))
            .collect();
        Box::new(ScriptedCursor {
            target: target.to_string(),
            rows,
            closed: false,
            close_fails,
            observers: Vec::new(),
            store: self.clone(),
        })
    }
}

impl BackingStore for ScriptedStore {
    fn query(&self, descriptor: &QueryDescriptor) -> Result<Option<Box<dyn RowCursor>>> {
        let reply = self.script.lock().pop_front().unwrap_or(Reply::Rows(Vec::new()));
        match reply {
            Reply::Rows(values) => Ok(Some(self.cursor(descriptor.target(), values, false))),
            Reply::BrokenClose(values) => Ok(Some(self.cursor(descriptor.target(), values, true))),
            Reply::NoData => Ok(None),
            Reply::Fail(e) => Err(e),
        }
    }
}

struct ScriptedCursor {
    target: String,
    rows: Vec<Row>,
    closed: bool,
    close_fails: bool,
    observers: Vec<ObserverId>,
    store: ScriptedStore,
}

impl RowCursor for ScriptedCursor {
    fn count(&self) -> usize {
        self.rows.len()
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
        self.observers.retain(|o| *o != id);
        self.store.observers.unregister(&self.target, id);
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for id in self.observers.drain(..) {
            self.store.observers.unregister(&self.target, id);
        }
        self.store.counters.closed.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            return Err(Error::source_unavailable(self.target.clone(), "close failed"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A query over a `ScriptedStore` driven by a `ManualPool`.
pub struct Harness {
    pub store: ScriptedStore,
    pub pool: Arc<ManualPool>,
    pub query: ReactiveQuery<i64>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        let store = ScriptedStore::new();
        let pool = Arc::new(ManualPool::new());
        let executor = FetchExecutor::new(Arc::new(store.clone()), pool.clone());
        let query = ReactiveQuery::new(
            QueryDescriptor::new("items"),
            |row: &Row| row.get_i64("n").unwrap_or(-1),
            executor,
        );
        Self {
            store,
            pool,
            query,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attaches `id`, logging each delivery as `<id>:<values>`.
    pub fn attach(&self, id: u64, scope: &LifetimeScope) -> bool {
        let log = self.log.clone();
        self.query
            .attach(id, scope, move |d: &Delivery<i64>| {
                let entry = match d {
                    Delivery::Loaded(s) => {
                        let values: Vec<String> =
                            s.to_vec().unwrap().iter().map(|v| v.to_string()).collect();
                        format!("{}:[{}]", id, values.join(","))
                    }
                    Delivery::Empty => format!("{}:empty", id),
                    Delivery::Failed(_) => format!("{}:failed", id),
                };
                log.lock().push(entry);
            })
            .unwrap()
    }

    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}
