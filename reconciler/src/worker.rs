//! Keyed work queue and worker pool.
//!
//! The queue hands a key to at most one worker at a time. A key added while
//! it is being processed is remembered and handed out again once the worker
//! calls [`WorkQueue::done`], so no update is lost and no two workers ever
//! touch the same working copy.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use cb_core::ObjectKey;
use gitops::OpContext;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::driver::{Action, Reconcile};

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed, queued or not.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify
}

/// Deduplicating FIFO of keys.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner)
        }
    }
}

impl<K: Clone + Eq + Hash + Send + 'static> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash + Send + 'static> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false
                }),
                notify: Notify::new()
            })
        }
    }

    /// Queues `key` unless it is already waiting.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queues `key` once `delay` has passed. Must be called within a tokio
    /// runtime.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks `key` as no longer being processed, re-queueing it if it was
    /// added in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops accepting keys and wakes every waiting worker.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs `workers` loops pulling keys from `queue` until it shuts down.
///
/// Reconciliation blocks on git and filesystem I/O, so each attempt runs on
/// tokio's blocking pool. A driver error requeues the key after
/// `error_delay`.
pub async fn run_workers(
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>,
    workers: usize,
    ctx: OpContext,
    error_delay: Duration
) {
    let kind = reconciler.kind();
    info!(kind, workers, "starting workers");

    let mut set = JoinSet::new();
    for worker in 0..workers.max(1) {
        let queue = queue.clone();
        let reconciler = Arc::clone(&reconciler);
        let ctx = ctx.clone();
        set.spawn(async move {
            while let Some(key) = queue.next().await {
                debug!(kind, worker, key = %key, "picked up key");
                let attempt = {
                    let reconciler = Arc::clone(&reconciler);
                    let ctx = ctx.clone();
                    let key = key.clone();
                    tokio::task::spawn_blocking(move || reconciler.reconcile(&ctx, &key)).await
                };
                queue.done(&key);

                match attempt {
                    Ok(Ok(Action::Done)) => {}
                    Ok(Ok(Action::RequeueAfter(delay))) => queue.add_after(key, delay),
                    Ok(Err(e)) => {
                        warn!(kind, key = %key, error = %e, "reconcile error, requeueing");
                        queue.add_after(key, error_delay);
                    }
                    Err(e) => {
                        error!(kind, key = %key, error = %e, "reconcile task aborted");
                        queue.add_after(key, error_delay);
                    }
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!(kind, error = %e, "worker exited abnormally");
        }
    }
    info!(kind, "workers stopped");
}
