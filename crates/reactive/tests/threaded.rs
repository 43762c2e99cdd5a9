//! Reactive queries running on a tokio-backed fetch pool.

mod common;

use common::init_tracing;
use quarry_core::{QueryDescriptor, Row};
use quarry_reactive::{
    BoundedReactiveCache, CacheConfig, Delivery, FetchExecutor, LifetimeScope, PoolConfig,
    QueryState, ReactiveQuery, RuntimePool,
};
use quarry_storage::MemoryStore;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn setup() -> (MemoryStore, FetchExecutor) {
    let store = MemoryStore::new();
    store.create_table("messages", ["body", "unread"]).unwrap();
    store.insert("messages", vec!["hello".into(), true.into()]).unwrap();
    let pool = RuntimePool::new(&PoolConfig {
        workers: 2,
        ..Default::default()
    })
    .unwrap();
    let executor = FetchExecutor::new(Arc::new(store.clone()), Arc::new(pool));
    (store, executor)
}

fn unread(executor: &FetchExecutor) -> ReactiveQuery<String> {
    ReactiveQuery::new(
        QueryDescriptor::new("messages")
            .projection(["body"])
            .selection("unread = ?")
            .arg(true)
            .sort_order("body"),
        |row: &Row| row.get_str("body").unwrap_or_default().to_string(),
        executor.clone(),
    )
}

fn subscribe(
    query: &ReactiveQuery<String>,
    id: u64,
    scope: &LifetimeScope,
) -> Receiver<Vec<String>> {
    let (tx, rx) = channel();
    let tx = parking_lot::Mutex::new(tx);
    query
        .attach(id, scope, move |d: &Delivery<String>| {
            if let Some(snapshot) = d.snapshot() {
                // The snapshot may already be superseded and closed.
                if let Ok(values) = snapshot.to_vec() {
                    let _ = tx.lock().send(values);
                }
            }
        })
        .unwrap();
    rx
}

#[test]
fn test_threaded_updates_follow_writes() {
    init_tracing();
    let (store, executor) = setup();
    let query = unread(&executor);
    let scope = LifetimeScope::new();
    let rx = subscribe(&query, 1, &scope);

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec!["hello"]);

    store.insert("messages", vec!["again".into(), true.into()]).unwrap();
    let mut latest = rx.recv_timeout(TIMEOUT).unwrap();
    while latest.len() < 2 {
        latest = rx.recv_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(latest, vec!["again", "hello"]);

    scope.end();
    assert_eq!(query.state(), QueryState::Idle);
}

#[test]
fn test_threaded_writers_and_subscribers() {
    init_tracing();
    let (store, executor) = setup();
    let query = unread(&executor);
    let scope = LifetimeScope::new();
    let rx = subscribe(&query, 1, &scope);
    rx.recv_timeout(TIMEOUT).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    store
                        .insert("messages", vec![format!("w{}-{}", w, i).into(), true.into()])
                        .unwrap();
                }
            })
        })
        .collect();
    let attachers: Vec<_> = (0..4u64)
        .map(|i| {
            let query = query.clone();
            let scope = scope.clone();
            thread::spawn(move || {
                for round in 0..10u64 {
                    let id = 100 + i * 100 + round;
                    query.attach(id, &scope, |_: &Delivery<String>| {}).unwrap();
                    query.detach(id);
                }
            })
        })
        .collect();
    for handle in writers.into_iter().chain(attachers) {
        handle.join().unwrap();
    }

    // Eventually a snapshot with every row is delivered.
    loop {
        let values = rx.recv_timeout(TIMEOUT).unwrap();
        if values.len() == 41 {
            break;
        }
    }

    query.destroy();
    assert_eq!(store.observer_count("messages"), 0);
}

#[test]
fn test_threaded_on_host_runtime() {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .unwrap();
    let store = MemoryStore::new();
    store.create_table("messages", ["body", "unread"]).unwrap();
    store.insert("messages", vec!["hello".into(), true.into()]).unwrap();
    let pool = RuntimePool::from_handle(runtime.handle().clone());
    let executor = FetchExecutor::new(Arc::new(store.clone()), Arc::new(pool));
    let query = unread(&executor);
    let scope = LifetimeScope::new();
    let rx = subscribe(&query, 1, &scope);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec!["hello"]);

    store
        .update("messages", "unread", false.into(), Some("body = ?"), &["hello".into()])
        .unwrap();
    let mut latest = rx.recv_timeout(TIMEOUT).unwrap();
    while !latest.is_empty() {
        latest = rx.recv_timeout(TIMEOUT).unwrap();
    }
    scope.end();
    assert_eq!(store.live_cursors(), 0);
}

#[test]
fn test_threaded_cache_of_queries() {
    let (_store, executor) = setup();
    let cache = BoundedReactiveCache::new(&CacheConfig { capacity: 2 });
    let scope = LifetimeScope::new();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            let executor = executor.clone();
            let scope = scope.clone();
            thread::spawn(move || {
                let key = format!("inbox-{}", i % 4);
                let query = cache.get_or_create(&key, || unread(&executor));
                query.attach(i, &scope, |_: &Delivery<String>| {}).unwrap();
                query.detach(i);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(cache.len() <= 2);
}
