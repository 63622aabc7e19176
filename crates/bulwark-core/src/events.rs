//! Typed component events.
//!
//! Each component (breaker, limiter, cache, pool, health aggregator) has its
//! own event enum implementing [`ComponentEvent`], and carries an
//! [`EventListeners`] list that builders and runtime subscriptions add to.
//! Events are delivered synchronously on the emitting task, so listeners
//! should hand heavy work off elsewhere.
//!
//! ```
//! use bulwark_core::{ComponentEvent, EventListeners, FnListener};
//! use std::time::Instant;
//!
//! #[derive(Debug)]
//! struct Evicted {
//!     cache: String,
//!     at: Instant,
//! }
//!
//! impl ComponentEvent for Evicted {
//!     fn kind(&self) -> &'static str {
//!         "evicted"
//!     }
//!     fn timestamp(&self) -> Instant {
//!         self.at
//!     }
//!     fn component(&self) -> &str {
//!         &self.cache
//!     }
//! }
//!
//! let mut listeners = EventListeners::new();
//! listeners.add(FnListener::new(|e: &Evicted| println!("{} {}", e.component(), e.kind())));
//! listeners.emit_with(|| Evicted { cache: "sessions".into(), at: Instant::now() });
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An event emitted by one named component.
pub trait ComponentEvent: Send + Sync + fmt::Debug {
    /// Stable snake_case label, usable as a metric or log field.
    fn kind(&self) -> &'static str;

    /// When the event happened.
    fn timestamp(&self) -> Instant;

    /// Name of the emitting component, e.g. `"payments"` or
    /// `"sessions.distributed"`.
    fn component(&self) -> &str;
}

/// Receives events of one type.
pub trait EventListener<E: ComponentEvent>: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &E);
}

/// Listeners registered on one component.
///
/// Cloning shares the listeners themselves, not the list: adding to a clone
/// leaves the original untouched.
#[derive(Clone)]
pub struct EventListeners<E: ComponentEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: ComponentEvent> EventListeners<E> {
    /// An empty list.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers `listener`.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Delivers `event` to every listener in registration order. A listener
    /// that panics is skipped; the others still run.
    ///
    /// Returns the number of listeners that panicked.
    pub fn emit(&self, event: &E) -> usize {
        self.listeners
            .iter()
            .filter(|listener| {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener.on_event(event)
                }))
                .is_err()
            })
            .count()
    }

    /// Like [`Self::emit`], but only builds the event when someone is
    /// listening.
    pub fn emit_with(&self, make: impl FnOnce() -> E) -> usize {
        if self.listeners.is_empty() {
            return 0;
        }
        self.emit(&make())
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: ComponentEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ComponentEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// Adapts a closure into an [`EventListener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _event: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: ComponentEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Tripped {
        breaker: String,
        at: Instant,
    }

    impl ComponentEvent for Tripped {
        fn kind(&self) -> &'static str {
            "tripped"
        }

        fn timestamp(&self) -> Instant {
            self.at
        }

        fn component(&self) -> &str {
            &self.breaker
        }
    }

    fn tripped() -> Tripped {
        Tripped {
            breaker: "payments".to_string(),
            at: Instant::now(),
        }
    }

    #[test]
    fn emits_to_every_listener_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = EventListeners::new();
        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            listeners.add(FnListener::new(move |e: &Tripped| {
                seen.lock().unwrap().push(format!("{label}:{}", e.component()));
            }));
        }

        assert_eq!(listeners.emit(&tripped()), 0);
        assert_eq!(listeners.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first:payments", "second:payments"]);
    }

    #[test]
    fn panicking_listener_is_counted_and_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &Tripped| panic!("listener bug")));
        listeners.add(FnListener::new(move |_: &Tripped| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(listeners.emit(&tripped()), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_with_skips_building_when_unobserved() {
        let built = AtomicUsize::new(0);
        let listeners: EventListeners<Tripped> = EventListeners::new();
        listeners.emit_with(|| {
            built.fetch_add(1, Ordering::SeqCst);
            tripped()
        });
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let mut listeners = listeners;
        listeners.add(FnListener::new(|_: &Tripped| {}));
        listeners.emit_with(|| {
            built.fetch_add(1, Ordering::SeqCst);
            tripped()
        });
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
