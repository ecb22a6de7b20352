//! Multicast notification streams.
//!
//! A [`Notifier`] delivers each dispatched value synchronously to every
//! current subscriber, in subscription order. Nothing is buffered: a
//! subscriber attached after a dispatch never sees that value.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Handle returned by [`Notifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Returns `false` once the subscriber should be dropped.
type Subscriber<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Subscriber<T>)>,
}

/// Synchronous, unbuffered publish/subscribe primitive.
pub struct Notifier<T> {
    subscribers: Mutex<Subscribers<T>>,
}

impl<T: 'static> Notifier<T> {
    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Attach a handler. It runs for every dispatch until unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach(Arc::new(move |value: &T| {
            handler(value);
            true
        }))
    }

    /// Detach a handler. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry_id, _)| *entry_id != id);
        subscribers.entries.len() != before
    }

    /// Deliver `value` to every current subscriber.
    ///
    /// Handlers run outside the internal lock, so they may subscribe or
    /// unsubscribe; such changes take effect from the next dispatch.
    pub fn dispatch(&self, value: &T) {
        let snapshot: Vec<(SubscriptionId, Subscriber<T>)> =
            self.subscribers.lock().entries.clone();

        let mut dropped = Vec::new();
        for (id, subscriber) in snapshot {
            if !subscriber(value) {
                dropped.push(id);
            }
        }

        if !dropped.is_empty() {
            self.subscribers
                .lock()
                .entries
                .retain(|(id, _)| !dropped.contains(id));
        }
    }

    /// Number of attached subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    /// Check if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach every subscriber.
    pub fn clear(&self) {
        self.subscribers.lock().entries.clear();
    }

    fn attach(&self, subscriber: Subscriber<T>) -> SubscriptionId {
        let mut subscribers = self.subscribers.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push((id, subscriber));
        id
    }
}

impl<T: Clone + Send + 'static> Notifier<T> {
    /// Forward dispatched values into a channel for async consumers.
    ///
    /// The subscription is dropped on the first dispatch after the receiver
    /// goes away.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(Arc::new(move |value: &T| tx.send(value.clone()).is_ok()));
        rx
    }
}

impl<T: 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.lock().entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_in_subscription_order() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            notifier.subscribe(move |value| seen.lock().push((tag, *value)));
        }

        notifier.dispatch(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = Notifier::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = notifier.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        notifier.dispatch(&());
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.dispatch(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_late_subscriber_misses_earlier_dispatch() {
        let notifier = Notifier::<u8>::new();
        notifier.dispatch(&1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        notifier.subscribe(move |v| s.lock().push(*v));
        notifier.dispatch(&2);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let notifier = Arc::new(Notifier::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None));

        let n = notifier.clone();
        let c = count.clone();
        let s = slot.clone();
        let id = notifier.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = s.lock().take() {
                n.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        notifier.dispatch(&());
        notifier.dispatch(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listen_and_prune() {
        let notifier = Notifier::<String>::new();
        let mut rx = notifier.listen();

        notifier.dispatch(&"hello".to_string());
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(notifier.len(), 1);

        drop(rx);
        notifier.dispatch(&"gone".to_string());
        assert!(notifier.is_empty());
    }
}
