use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Unbounded in-memory retry buffer between the store and the remote API.
///
/// Filled by the ingress handlers and drained by exactly one delivery worker.
pub struct DeliveryQueue<T> {
    entries: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for DeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeliveryQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Appends to the tail. Never blocks on capacity.
    pub fn enqueue(&self, entry: T) {
        self.entries().push_back(entry);
        self.available.notify_one();
    }

    /// Puts back an entry the worker could not deliver.
    ///
    /// Goes to the tail unless `at_head` is set, in which case it is the next
    /// entry popped.
    pub fn requeue(&self, entry: T, at_head: bool) {
        {
            let mut entries = self.entries();
            if at_head {
                entries.push_front(entry);
            } else {
                entries.push_back(entry);
            }
        }
        self.available.notify_one();
    }

    /// Pops the head, waiting at most `wait` for an entry to arrive.
    pub async fn pop(&self, wait: Duration) -> Option<T> {
        if let Some(entry) = self.try_pop() {
            return Some(entry);
        }

        // a permit stored by an enqueue racing with try_pop wakes this at once
        let _ = tokio::time::timeout(wait, self.available.notified()).await;
        self.try_pop()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.entries().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<T>> {
        // a panic while holding the lock cannot leave the deque half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
