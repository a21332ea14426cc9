//! De-duplicating FIFO work queue.
//!
//! Producers `add` items that need reconciliation; an item already waiting in
//! the queue is coalesced rather than queued twice. Consumers `get` items in
//! insertion order and wait when the queue is empty. Once an item has been
//! handed to a consumer it may be added again.
//!
//! Consumers must tolerate stale items: by the time an item is processed the
//! condition that produced it may no longer hold.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Inner<T> {
    queue: VecDeque<T>,
    pending: HashSet<T>,
    is_shut_down: bool,
}

/// A de-duplicating queue shared between producers and consumers.
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T: Eq + Hash + Clone> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pending: HashSet::new(),
                is_shut_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Queue `item` unless an equal item is already pending.
    ///
    /// Returns true if the item was queued. After [`shut_down`](Self::shut_down)
    /// this is a no-op returning false.
    pub fn add(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_shut_down || !inner.pending.insert(item.clone()) {
            return false;
        }
        inner.queue.push_back(item);
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the oldest pending item without waiting.
    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.queue.pop_front()?;
        inner.pending.remove(&item);
        Some(item)
    }

    /// Wait for the next item.
    ///
    /// Returns `None` when `cancel` fires or the queue is shut down and drained.
    pub async fn get(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an add between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(item) = self.try_get() {
                return Some(item);
            }
            if self.inner.lock().is_shut_down {
                return None;
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Stop accepting items and wake every waiting consumer.
    ///
    /// Items already queued can still be drained.
    pub fn shut_down(&self) {
        self.inner.lock().is_shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().is_shut_down
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn add_coalesces_pending_items() {
        let queue = WorkQueue::new();
        assert!(queue.add("10.10.0.2/24".to_string()));
        assert!(!queue.add("10.10.0.2/24".to_string()));
        assert!(queue.add("10.10.0.3/24".to_string()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn items_come_out_in_insertion_order() {
        let queue = WorkQueue::new();
        queue.add(3);
        queue.add(1);
        queue.add(2);
        assert_eq!(queue.try_get(), Some(3));
        assert_eq!(queue.try_get(), Some(1));
        assert_eq!(queue.try_get(), Some(2));
        assert_eq!(queue.try_get(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn item_can_be_requeued_after_get() {
        let queue = WorkQueue::new();
        queue.add("a");
        assert_eq!(queue.try_get(), Some("a"));
        assert!(queue.add("a"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn shut_down_rejects_new_items() {
        let queue = WorkQueue::new();
        queue.add(1);
        queue.shut_down();
        assert!(!queue.add(2));
        assert!(queue.is_shut_down());
        assert_eq!(queue.try_get(), Some(1));
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.get(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add("10.10.0.2/24");
        assert_eq!(consumer.await.unwrap(), Some("10.10.0.2/24"));
    }

    #[tokio::test]
    async fn get_returns_none_on_cancel() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(queue.get(&cancel).await, None);
    }

    #[tokio::test]
    async fn get_returns_none_after_shut_down_and_drain() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.get(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shut_down();
        assert_eq!(consumer.await.unwrap(), None::<u32>);
    }
}
