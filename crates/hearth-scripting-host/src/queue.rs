use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Queue state guarded by the mutex
#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Thread-safe FIFO used to hand work from producer threads to the tick loop
///
/// This is the only type in the crate that is touched from more than one thread.
/// Everything else runs on the simulation thread and expects work to arrive here first.
///
/// Shutdown is terminal: pending items are discarded, every blocked waiter is woken,
/// and all later pops return `None`.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    // Queue state is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiter
    ///
    /// Returns false if the queue has been shut down, in which case the item is dropped.
    pub fn push(&self, item: T) -> bool {
        {
            let mut inner = self.lock();
            if inner.shutdown {
                debug!(target: "work_queue", "Push after shutdown, dropping item");
                return false;
            }
            inner.items.push_back(item);
        }
        self.not_empty.notify_one();
        true
    }

    /// Pop the front item without blocking
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.lock();
        if inner.shutdown {
            return None;
        }
        inner.items.pop_front()
    }

    /// Block until an item is available or the queue is shut down
    ///
    /// `None` means "stop consuming": it is only returned after shutdown.
    pub fn wait_and_pop(&self) -> Option<T> {
        let inner = self.lock();
        let mut inner = self
            .not_empty
            .wait_while(inner, |inner| inner.items.is_empty() && !inner.shutdown)
            .unwrap_or_else(PoisonError::into_inner);

        if inner.shutdown {
            return None;
        }
        inner.items.pop_front()
    }

    /// Like `wait_and_pop`, but gives up after `timeout`
    pub fn wait_and_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let inner = self.lock();
        let (mut inner, _) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |inner| {
                inner.items.is_empty() && !inner.shutdown
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.shutdown {
            return None;
        }
        inner.items.pop_front()
    }

    /// Take everything currently queued, in FIFO order, without blocking
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Vec::new();
        }
        inner.items.drain(..).collect()
    }

    /// Discard all pending items, mark the queue shut down and wake every waiter
    pub fn shutdown(&self) {
        let discarded = {
            let mut inner = self.lock();
            inner.shutdown = true;
            let discarded = inner.items.len();
            inner.items.clear();
            discarded
        };

        debug!(target: "work_queue", "Queue shut down, discarded {} pending item(s)", discarded);
        self.not_empty.notify_all();
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Snapshot emptiness check. Advisory only; another thread may push right after.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Snapshot of the number of queued items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
