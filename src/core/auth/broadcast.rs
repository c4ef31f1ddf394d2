//! Observable authentication state
//!
//! A current-value cell plus a list of callbacks. Every [`AuthBroadcast::publish`]
//! invokes each subscriber synchronously, and a new subscriber is called with
//! the current value as soon as it subscribes (replay of one).

use std::sync::{Arc, Mutex, MutexGuard};

type Subscriber = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`AuthBroadcast::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BroadcastInner {
    current: bool,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

/// Push-based boolean auth state
pub struct AuthBroadcast {
    inner: Mutex<BroadcastInner>,
}

impl AuthBroadcast {
    pub fn new(initial: bool) -> Self {
        Self {
            inner: Mutex::new(BroadcastInner {
                current: initial,
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last published value
    pub fn current(&self) -> bool {
        self.lock().current
    }

    /// Register a callback. It is invoked immediately with the current value,
    /// then once per publish until unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback: Subscriber = Arc::new(callback);
        let (id, current) = {
            let mut inner = self.lock();
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.subscribers.push((id, callback.clone()));
            (id, inner.current)
        };

        callback(current);
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Set the current value and notify every subscriber once.
    ///
    /// Callbacks run after the internal lock is released, so they may read the
    /// state or (un)subscribe without deadlocking.
    pub fn publish(&self, value: bool) {
        let subscribers: Vec<Subscriber> = {
            let mut inner = self.lock();
            inner.current = value;
            inner.subscribers.iter().map(|(_, s)| s.clone()).collect()
        };

        for subscriber in subscribers {
            subscriber(value);
        }
    }
}

impl std::fmt::Debug for AuthBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("AuthBroadcast")
            .field("current", &inner.current)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}
