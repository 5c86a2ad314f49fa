//! Explicit publish/subscribe with unsubscribe handles
//!
//! Every `subscribe` call in the crate returns a [`Subscription`]. Dropping
//! the handle, or calling [`Subscription::unsubscribe`], removes the handler,
//! so a view that forgets to clean up cannot leak a subscriber.
//!
//! Handlers run synchronously on the publishing task, in registration order,
//! and outside the registry lock, so a handler may itself subscribe,
//! unsubscribe or read the component that published.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// A registered event handler.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// Ordered handler registry for events of type `T`.
///
/// Cloning a `Subscribers` yields another handle to the same registry.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use reviewsync::pubsub::Subscribers;
///
/// let subscribers = Subscribers::<u32>::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let subscription = subscribers.subscribe(move |n| {
///     counter.fetch_add(*n as usize, Ordering::SeqCst);
/// });
///
/// subscribers.publish(&2);
/// subscription.unsubscribe();
/// subscribers.publish(&40);
///
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
pub struct Subscribers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: 'static> Subscribers<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` and returns the capability that removes it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).handlers.retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    /// Invokes every current handler with `event`, in registration order.
    pub fn publish(&self, event: &T) {
        let handlers: Vec<Handler<T>> = lock(&self.registry)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl<T> Subscribers<T> {
    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        lock(&self.registry).handlers.len()
    }

    /// Returns `true` when nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Unsubscribe capability returned by every `subscribe` call.
///
/// Dropping the handle unsubscribes as well.
#[must_use = "dropping a Subscription immediately unsubscribes the handler"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync + 'static>>,
}

impl Subscription {
    /// Removes the handler. Idempotent with respect to drop.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    /// Returns `true` until the handler has been removed.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Subscribers<String>) {
        (Arc::new(Mutex::new(Vec::new())), Subscribers::new())
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let (log, subs) = recorder();
        let a = Arc::clone(&log);
        let b = Arc::clone(&log);
        let _s1 = subs.subscribe(move |e: &String| a.lock().unwrap().push(format!("first:{e}")));
        let _s2 = subs.subscribe(move |e: &String| b.lock().unwrap().push(format!("second:{e}")));

        subs.publish(&"x".to_string());

        assert_eq!(*log.lock().unwrap(), vec!["first:x", "second:x"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let (log, subs) = recorder();
        let a = Arc::clone(&log);
        let b = Arc::clone(&log);
        let s1 = subs.subscribe(move |e: &String| a.lock().unwrap().push(format!("a:{e}")));
        let _s2 = subs.subscribe(move |e: &String| b.lock().unwrap().push(format!("b:{e}")));

        s1.unsubscribe();
        subs.publish(&"y".to_string());

        assert_eq!(*log.lock().unwrap(), vec!["b:y"]);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (log, subs) = recorder();
        {
            let a = Arc::clone(&log);
            let _s = subs.subscribe(move |e: &String| a.lock().unwrap().push(e.clone()));
            assert_eq!(subs.len(), 1);
        }
        subs.publish(&"ignored".to_string());
        assert!(log.lock().unwrap().is_empty());
        assert!(subs.is_empty());
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let subs = Subscribers::<u8>::new();
        let subscription = subs.subscribe(|_| {});
        drop(subs);
        assert!(subscription.is_active());
        subscription.unsubscribe();
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let subs = Subscribers::<u8>::new();
        let inner = subs.clone();
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&spawned);
        let _s = subs.subscribe(move |_| {
            keep.lock().unwrap().push(inner.subscribe(|_| {}));
        });

        subs.publish(&1);

        assert_eq!(subs.len(), 2);
    }
}
