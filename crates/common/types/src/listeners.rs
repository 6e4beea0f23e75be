//! Synchronous event fan-out.
//!
//! Callbacks run on the emitting thread, in registration order, after the emitter has
//! released its own locks.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<E>)>,
}

/// A list of subscribers for events of type `E`.
pub struct Listeners<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback. It stays registered until the returned handle is dropped.
    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.push((id, Arc::new(callback)));

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().callbacks.retain(|(cb_id, _)| *cb_id != id);
                }
            })),
        }
    }

    /// Delivers `event` to every current subscriber.
    pub fn emit(&self, event: &E) {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking.
        let callbacks: Vec<Callback<E>> = self
            .registry
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle keeping a callback registered.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keeps the callback registered for as long as the [`Listeners`] lives.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn delivers_in_registration_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let _a = listeners.subscribe(move |e| s1.lock().push(("a", *e)));
        let s2 = seen.clone();
        let _b = listeners.subscribe(move |e| s2.lock().push(("b", *e)));

        listeners.emit(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let listeners = Listeners::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&());
        drop(sub);
        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let listeners = Listeners::<()>::new();
        listeners.subscribe(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }
}
