//! Observable values with explicit subscription lists.
//!
//! Architecture:
//! - Subscribers register with a delivery policy
//! - `Delivery::Immediate`: callback runs synchronously inside `set()`
//! - `Delivery::Deferred`: latest value is held until the owner calls
//!   `flush()` (typically once per playback tick)
//!
//! Callback order: FIFO (first-subscribed, first-called) within a policy.
//! Deferred subscribers only ever see the newest value; intermediate
//! values set between two flushes are coalesced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// When a subscriber hears about a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inside `set()`, on the setter's thread
    Immediate,
    /// On the next `flush()`
    Deferred,
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: SubscriptionId,
    delivery: Delivery,
    callback: Callback<T>,
}

struct Shared<T> {
    value: RwLock<T>,
    subscribers: RwLock<Vec<Subscriber<T>>>,
    /// Value waiting for deferred delivery
    pending: Mutex<Option<T>>,
    next_id: AtomicU64,
}

/// Shared value that notifies subscribers on change.
///
/// Clones share state: a clone handed to a UI observer sees every update.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.shared.value.read().unwrap_or_else(|e| e.into_inner()))
            .field(
                "subscribers",
                &self.shared.subscribers.read().map(|s| s.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl<T: Default + Clone + PartialEq + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: RwLock::new(value),
                subscribers: RwLock::new(Vec::new()),
                pending: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current value (cloned)
    pub fn get(&self) -> T {
        self.shared.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register a callback. Returns a handle for `unsubscribe`.
    pub fn subscribe<F>(&self, delivery: Delivery, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                id,
                delivery,
                callback: Arc::new(callback),
            });
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Store a new value and notify. Equal values are ignored.
    ///
    /// Returns true if the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.shared.value.write().unwrap_or_else(|e| e.into_inner());
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        // Snapshot callbacks so a callback may (un)subscribe without deadlock
        let immediate = self.callbacks(Delivery::Immediate);
        let has_deferred = !self.callbacks(Delivery::Deferred).is_empty();

        if has_deferred {
            *self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.clone());
        }
        for cb in immediate {
            cb(&value);
        }
        true
    }

    /// Deliver the latest pending value to deferred subscribers.
    ///
    /// Returns true if anything was delivered.
    pub fn flush(&self) -> bool {
        let pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(value) = pending else {
            return false;
        };
        for cb in self.callbacks(Delivery::Deferred) {
            cb(&value);
        }
        true
    }

    fn callbacks(&self, delivery: Delivery) -> Vec<Callback<T>> {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.delivery == delivery)
            .map(|s| Arc::clone(&s.callback))
            .collect()
    }
}
