//! Worker pools that run fetches off the caller's thread.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, usually on other threads.
pub trait TaskPool: Send + Sync {
    fn spawn(&self, task: Task);
}

impl<P: TaskPool + ?Sized> TaskPool for Arc<P> {
    fn spawn(&self, task: Task) {
        (**self).spawn(task)
    }
}

/// Configuration for [`RuntimePool`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of runtime worker threads, also the cap on blocking fetch
    /// threads. Zero is treated as one.
    pub workers: usize,
    /// Thread name prefix; threads are named `<prefix>-<n>`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            thread_name: "quarry-fetch".to_string(),
        }
    }
}

/// Runs fetches on a tokio runtime's blocking pool.
///
/// Store reads are synchronous, so each task goes through `spawn_blocking`.
/// A panicking task is logged and leaves the pool usable. The pool either
/// owns a runtime built from [`PoolConfig`] or borrows the host's through a
/// [`Handle`].
pub struct RuntimePool {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl RuntimePool {
    /// Builds a dedicated multi-threaded runtime.
    pub fn new(config: &PoolConfig) -> io::Result<Self> {
        let workers = config.workers.max(1);
        let prefix = config.thread_name.clone();
        let next = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name_fn(move || format!("{}-{}", prefix, next.fetch_add(1, Ordering::Relaxed)))
            .build()?;
        tracing::debug!(workers, "fetch runtime started");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Runs tasks on a runtime the host already owns.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// True if the pool owns its runtime.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl TaskPool for RuntimePool {
    fn spawn(&self, task: Task) {
        let join = self.handle.spawn_blocking(task);
        self.handle.spawn(async move {
            if let Err(e) = join.await {
                if e.is_panic() {
                    tracing::error!("pool task panicked");
                } else {
                    tracing::warn!(error = %e, "pool task cancelled");
                }
            }
        });
    }
}

impl Drop for RuntimePool {
    fn drop(&mut self) {
        // The last handle may be released from inside a task, where a
        // blocking shutdown would wait on itself.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A pool that only runs tasks when told to.
///
/// Tests and hosts with their own scheduler use it to control exactly when
/// each fetch completes.
#[derive(Default)]
pub struct ManualPool {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest queued task. Returns false if there was none.
    pub fn run_next(&self) -> bool {
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including tasks queued while
    /// running. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TaskPool for ManualPool {
    fn spawn(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}
