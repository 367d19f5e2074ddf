use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash};
use tokio::sync::Notify;

/// An item that may be coalesced with other pending items sharing its key.
pub trait Dedup {
    type Key: Clone + Eq + Hash;

    fn dedup_key(&self) -> Self::Key;

    /// Merges a newer item with the same key into this pending item.
    fn supersede(&mut self, newer: Self);
}

/// A bounded FIFO queue holding at most one pending item per key.
///
/// Pushing an item whose key is already pending merges it into the pending item, which keeps its
/// position in the queue. Both `push` and `pop` wait when the queue is full or empty,
/// respectively, and are cancel-safe.
pub struct DedupQueue<T: Dedup> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Notify,
    not_full: Notify,
}

struct State<T: Dedup> {
    order: VecDeque<T::Key>,
    pending: HashMap<T::Key, T>,
}

/// The outcome of a push.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    Coalesced,
}

// === impl DedupQueue ===

impl<T: Dedup> DedupQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                order: VecDeque::new(),
                pending: HashMap::new(),
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().order.is_empty()
    }

    /// Enqueues an item, waiting for capacity if its key isn't already pending.
    pub async fn push(&self, item: T) -> Pushed {
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(pushed) => return pushed,
                Err(full) => item = full,
            }
            notified.await;
        }
    }

    /// Enqueues an item if its key is already pending or there is capacity; otherwise the item is
    /// returned.
    pub fn try_push(&self, item: T) -> Result<Pushed, T> {
        let key = item.dedup_key();
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.get_mut(&key) {
            pending.supersede(item);
            return Ok(Pushed::Coalesced);
        }
        if state.order.len() >= self.capacity {
            return Err(item);
        }
        state.order.push_back(key.clone());
        state.pending.insert(key, item);
        drop(state);

        self.not_empty.notify_one();
        Ok(Pushed::Queued)
    }

    /// Dequeues the oldest pending item, waiting for one to be pushed if the queue is empty.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = loop {
            let key = state.order.pop_front()?;
            if let Some(item) = state.pending.remove(&key) {
                break item;
            }
        };
        drop(state);

        self.not_full.notify_one();
        Some(item)
    }
}

impl<T: Dedup> std::fmt::Debug for DedupQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    #[derive(Debug, PartialEq)]
    struct Item {
        key: &'static str,
        versions: Vec<u32>,
    }

    impl Item {
        fn new(key: &'static str, version: u32) -> Self {
            Self {
                key,
                versions: vec![version],
            }
        }
    }

    impl Dedup for Item {
        type Key = &'static str;

        fn dedup_key(&self) -> &'static str {
            self.key
        }

        fn supersede(&mut self, newer: Self) {
            self.versions.extend(newer.versions);
        }
    }

    #[test]
    fn coalesces_pending_keys() {
        let queue = DedupQueue::new(10);
        assert_eq!(queue.try_push(Item::new("a", 1)), Ok(Pushed::Queued));
        assert_eq!(queue.try_push(Item::new("b", 1)), Ok(Pushed::Queued));
        assert_eq!(queue.try_push(Item::new("a", 2)), Ok(Pushed::Coalesced));
        assert_eq!(queue.len(), 2);

        assert_eq!(
            queue.try_pop(),
            Some(Item {
                key: "a",
                versions: vec![1, 2]
            })
        );
        assert_eq!(queue.try_pop(), Some(Item::new("b", 1)));
        assert_eq!(queue.try_pop(), None);

        // Once popped, a key may be queued again.
        assert_eq!(queue.try_push(Item::new("a", 3)), Ok(Pushed::Queued));
    }

    #[test]
    fn full_queue_still_coalesces() {
        let queue = DedupQueue::new(1);
        assert_eq!(queue.try_push(Item::new("a", 1)), Ok(Pushed::Queued));
        assert_eq!(queue.try_push(Item::new("b", 1)), Err(Item::new("b", 1)));
        assert_eq!(queue.try_push(Item::new("a", 2)), Ok(Pushed::Coalesced));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn push_waits_for_capacity() {
        let queue = DedupQueue::new(1);
        assert_eq!(queue.try_push(Item::new("a", 1)), Ok(Pushed::Queued));

        let mut push = task::spawn(queue.push(Item::new("b", 1)));
        assert_pending!(push.poll());

        assert_eq!(queue.try_pop(), Some(Item::new("a", 1)));
        assert!(push.is_woken());
        assert_ready_eq!(push.poll(), Pushed::Queued);
        assert_eq!(queue.try_pop(), Some(Item::new("b", 1)));
    }

    #[test]
    fn pop_waits_for_push() {
        let queue = DedupQueue::new(1);

        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        assert_eq!(queue.try_push(Item::new("a", 1)), Ok(Pushed::Queued));
        assert!(pop.is_woken());
        let item = assert_ready!(pop.poll());
        assert_eq!(item, Item::new("a", 1));
    }

    #[tokio::test]
    async fn concurrent_producer_and_consumer() {
        let queue = std::sync::Arc::new(DedupQueue::new(2));
        let producer = tokio::spawn({
            let queue = queue.clone();
            async move {
                for key in ["a", "b", "c", "d", "e"] {
                    queue.push(Item::new(key, 1)).await;
                }
            }
        });

        let mut keys = vec![];
        while keys.len() < 5 {
            let item = tokio::time::timeout(Duration::from_secs(1), queue.pop())
                .await
                .expect("item must be popped");
            keys.push(item.key);
        }
        producer.await.expect("producer must complete");
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }
}
