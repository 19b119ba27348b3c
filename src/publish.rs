//! Typed publish/subscribe registry
//!
//! Subscribers are invoked synchronously on the publishing thread, in
//! registration order. A panicking subscriber is logged and skipped so the
//! remaining subscribers still receive the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Callback type for published events.
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered list of subscribers for one event kind.
pub struct Publisher<T> {
    topic: &'static str,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
    /// Subscriber invocations that panicked
    failures: AtomicU64,
}

impl<T> Publisher<T> {
    pub fn new(topic: &'static str) -> Self {
        Self {
            topic,
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
            failures: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::new(callback)));
        log::debug!("{}: subscriber {:?} registered", self.topic, id);
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        before != subscribers.len()
    }

    /// Deliver an event to every subscriber. Returns the number of
    /// subscribers that handled it without panicking.
    pub fn publish(&self, event: &T) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly
        let snapshot: Vec<(SubscriptionId, Subscriber<T>)> = self.subscribers.read().clone();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("{}: subscriber {:?} panicked", self.topic, id);
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_publish_in_registration_order() {
        let publisher = Publisher::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            publisher.subscribe(move |value: &u32| seen.lock().push(format!("{}{}", tag, value)));
        }

        assert_eq!(publisher.publish(&7), 3);
        assert_eq!(*seen.lock(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let publisher = Publisher::<u32>::new("test");
        let count = Arc::new(AtomicU64::new(0));

        publisher.subscribe(|_: &u32| panic!("faulty subscriber"));
        let c = count.clone();
        publisher.subscribe(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(publisher.publish(&1), 1);
        assert_eq!(publisher.publish(&2), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.failure_count(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let publisher = Publisher::<u32>::new("test");
        let id = publisher.subscribe(|_: &u32| {});
        assert_eq!(publisher.len(), 1);
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
        assert!(publisher.is_empty());
        assert_eq!(publisher.publish(&0), 0);
    }

    #[test]
    fn test_reentrant_subscribe_does_not_deadlock() {
        let publisher = Arc::new(Publisher::<u32>::new("test"));
        let inner = publisher.clone();
        publisher.subscribe(move |_: &u32| {
            inner.subscribe(|_: &u32| {});
        });

        publisher.publish(&0);
        assert_eq!(publisher.len(), 2);
    }
}
