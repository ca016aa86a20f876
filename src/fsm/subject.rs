//! Observer registries
//!
//! A [`Subject`] keeps weak references to its observers so that entities can
//! observe each other (phase ↔ condition ↔ part ↔ controller) without
//! reference cycles. Whoever registers an observer keeps it alive.

use std::sync::{Arc, RwLock, Weak};

use super::{read, write};

/// Receives state-token notifications (`"ready"`, `"active"`, ...).
pub trait StateObserver: Send + Sync {
    /// Called after an entity changed state.
    fn on_state_changed(&self, state: &str);
}

/// Receives timer ticks.
pub trait TickObserver: Send + Sync {
    /// Called once per elapsed interval.
    fn on_tick(&self);
}

/// Ordered, thread-safe list of weakly held observers.
pub struct Subject<O: ?Sized> {
    observers: RwLock<Vec<Weak<O>>>,
}

impl<O: ?Sized> Default for Subject<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> std::fmt::Debug for Subject<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.len())
            .finish()
    }
}

impl<O: ?Sized> Subject<O> {
    /// Creates an empty subject.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers `observer`. Registering the same observer twice delivers
    /// every notification twice.
    pub fn add_observer(&self, observer: &Arc<O>) {
        self.subscribe(Arc::downgrade(observer));
    }

    /// Registers a weak observer. Observers that are already dropped are
    /// ignored.
    pub fn subscribe(&self, observer: Weak<O>) {
        if observer.strong_count() == 0 {
            return;
        }
        let mut observers = write(&self.observers);
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    /// Registers a weak observer ahead of every existing registration.
    pub fn subscribe_first(&self, observer: Weak<O>) {
        if observer.strong_count() == 0 {
            return;
        }
        let mut observers = write(&self.observers);
        observers.retain(|o| o.strong_count() > 0);
        observers.insert(0, observer);
    }

    /// Removes the first registration of `observer`, if any.
    pub fn remove_observer(&self, observer: &Arc<O>) {
        self.remove_where(|o| std::ptr::addr_eq(o.as_ptr(), Arc::as_ptr(observer)));
    }

    /// Removes the first registration of a weak `observer`, if any.
    pub fn unsubscribe(&self, observer: &Weak<O>) {
        self.remove_where(|o| Weak::ptr_eq(o, observer));
    }

    fn remove_where(&self, matches: impl Fn(&Weak<O>) -> bool) {
        let mut observers = write(&self.observers);
        if let Some(pos) = observers.iter().position(matches) {
            observers.remove(pos);
        }
    }

    /// Calls `f` for each live observer in registration order.
    ///
    /// The list is snapshotted first, so observers may add or remove
    /// registrations (including their own) from inside the callback.
    pub fn notify(&self, mut f: impl FnMut(&O)) {
        let snapshot: Vec<Weak<O>> = read(&self.observers).clone();
        for observer in snapshot {
            if let Some(observer) = observer.upgrade() {
                f(&observer);
            }
        }
    }

    /// Number of registrations whose observer is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.observers)
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
