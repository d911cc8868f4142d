//! Observer registry for component events.
//!
//! Components own a `Listeners<E>` for their event type and call [`Listeners::emit`]
//! after each observable state change. Hosts register closures with
//! [`Listeners::subscribe`] and keep the returned [`ListenerId`] to detach later.
//! A host that prefers polling registers a closure that forwards into a channel.

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::limits::LISTENERS_MAX;

/// Handle returned by [`Listeners::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Listener<E> = Box<dyn FnMut(&E) + Send>;

/// A set of observers for events of type `E`.
pub struct Listeners<E> {
    entries: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
}

impl<E> Listeners<E> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a listener.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ListenerLimit` if `LISTENERS_MAX` listeners are
    /// already registered.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&E) + Send + 'static,
    {
        if self.entries.len() >= LISTENERS_MAX {
            return Err(CoreError::ListenerLimit {
                count: self.entries.len(),
                max: LISTENERS_MAX,
            });
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        Ok(id)
    }

    /// Removes a listener. Returns `false` if the id was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Delivers an event to every listener in subscription order.
    pub fn emit(&mut self, event: &E) {
        for (_, listener) in &mut self.entries {
            listener(event);
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all listeners.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners: Listeners<u32> = Listeners::new();

        let first = Arc::clone(&seen);
        listeners
            .subscribe(move |e: &u32| first.lock().unwrap().push(("a", *e)))
            .unwrap();
        let second = Arc::clone(&seen);
        listeners
            .subscribe(move |e: &u32| second.lock().unwrap().push(("b", *e)))
            .unwrap();

        listeners.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_detaches_listener() {
        let count = Arc::new(Mutex::new(0_u32));
        let mut listeners: Listeners<()> = Listeners::new();

        let c = Arc::clone(&count);
        let id = listeners.subscribe(move |_| *c.lock().unwrap() += 1).unwrap();

        listeners.emit(&());
        assert!(listeners.unsubscribe(id));
        listeners.emit(&());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!listeners.unsubscribe(id));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_limit() {
        let mut listeners: Listeners<()> = Listeners::new();
        for _ in 0..LISTENERS_MAX {
            listeners.subscribe(|_| {}).unwrap();
        }

        let result = listeners.subscribe(|_| {});
        assert!(matches!(result, Err(CoreError::ListenerLimit { .. })));
        assert_eq!(listeners.len(), LISTENERS_MAX);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut listeners: Listeners<()> = Listeners::new();
        let a = listeners.subscribe(|_| {}).unwrap();
        listeners.unsubscribe(a);
        let b = listeners.subscribe(|_| {}).unwrap();
        assert_ne!(a, b);
    }
}
