//! Per-stream FIFO delivery queue.
//!
//! A [`DeliveryQueue`] accepts entries without ever blocking and hands them to
//! an async handler one at a time on a dedicated task. The next entry is not
//! popped until the handler for the previous one has finished, so a slow
//! consumer makes the queue grow; [`QueueDepth`] exposes that growth in O(1)
//! for the backpressure controller.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Shared<T> {
    entries: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Shared<T> {
    fn pop(&self) -> Option<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Read-only view of a queue's depth.
#[derive(Clone)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    /// Current number of undelivered entries.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for QueueDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueueDepth").field(&self.get()).finish()
    }
}

/// FIFO queue drained by a background task.
pub struct DeliveryQueue<T> {
    name: &'static str,
    shared: Arc<Shared<T>>,
    /// Waiting entries plus the one being delivered.
    depth: Arc<AtomicUsize>,
    drain: JoinHandle<()>,
}

impl<T: Send + 'static> DeliveryQueue<T> {
    /// Create a queue and start draining it into `handler` on `runtime`.
    pub fn spawn<F, Fut>(name: &'static str, runtime: &Handle, mut handler: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let depth = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(Shared {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });

        let task_shared = Arc::clone(&shared);
        let task_depth = Arc::clone(&depth);
        let drain = runtime.spawn(async move {
            loop {
                let entry = loop {
                    if let Some(entry) = task_shared.pop() {
                        break entry;
                    }
                    task_shared.notify.notified().await;
                };

                if AssertUnwindSafe(handler(entry)).catch_unwind().await.is_err() {
                    warn!(queue = name, "delivery handler panicked, continuing");
                }
                task_depth.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Self {
            name,
            shared,
            depth,
            drain,
        }
    }

    /// Append an entry and return the new depth. Never blocks.
    pub fn push(&self, entry: T) -> usize {
        let depth = {
            let mut entries = self
                .shared
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.push_back(entry);
            self.depth.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.shared.notify.notify_one();
        depth
    }

    /// Number of undelivered entries, counting the one being delivered.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether nothing is waiting or in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A cloneable depth reader.
    pub fn depth(&self) -> QueueDepth {
        QueueDepth(Arc::clone(&self.depth))
    }

    /// Drop every entry that has not started delivery.
    ///
    /// An entry already handed to the handler finishes normally.
    pub fn clear(&self) -> usize {
        let mut entries = self
            .shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let dropped = entries.len();
        entries.clear();
        self.depth.fetch_sub(dropped, Ordering::SeqCst);
        if dropped > 0 {
            debug!(queue = self.name, dropped, "cleared undelivered entries");
        }
        dropped
    }

    /// Stop the drain task. Undelivered entries are dropped.
    pub fn close(&self) {
        self.drain.abort();
        self.clear();
    }
}

impl<T> Drop for DeliveryQueue<T> {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
