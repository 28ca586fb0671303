//! Reactive Event Router
//!
//! Ordered listener storage shared by every reactive value in the tree.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Reactive, ReactiveValue};

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique router identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouterId(u64);

impl RouterId {
    fn next() -> Self {
        Self(NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Generic "something changed" notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactiveChangeEvent {
    source: RouterId,
}

impl ReactiveChangeEvent {
    /// Router that fired the change
    pub fn source(&self) -> RouterId {
        self.source
    }
}

enum Listener<E> {
    Event(Rc<dyn Fn(&E)>),
    Change(Rc<dyn Fn(&ReactiveChangeEvent)>),
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        match self {
            Listener::Event(f) => Listener::Event(Rc::clone(f)),
            Listener::Change(f) => Listener::Change(Rc::clone(f)),
        }
    }
}

struct Slot<E> {
    id: u64,
    listener: Listener<E>,
}

struct RouterInner<E> {
    id: RouterId,
    listeners: RefCell<Vec<Slot<E>>>,
    next_slot: Cell<u64>,
}

impl<E> RouterInner<E> {
    fn push(&self, listener: Listener<E>) -> u64 {
        let id = self.next_slot.get();
        self.next_slot.set(id + 1);
        self.listeners.borrow_mut().push(Slot { id, listener });
        id
    }

    fn remove(&self, slot: u64) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|s| s.id != slot);
        listeners.len() != before
    }
}

/// Handle that detaches a previously added listener
///
/// Dropping the handle keeps the listener registered.
#[must_use = "dropping the remover keeps the listener registered forever"]
pub struct ListenerRemover {
    remove: Option<Box<dyn FnOnce()>>,
}

impl ListenerRemover {
    pub(crate) fn new(remove: impl FnOnce() + 'static) -> Self {
        Self { remove: Some(Box::new(remove)) }
    }

    /// A remover that does nothing
    pub fn noop() -> Self {
        Self { remove: None }
    }

    /// Detach the listener. Does nothing if the router is gone.
    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerRemover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRemover")
            .field("armed", &self.remove.is_some())
            .finish()
    }
}

/// Event router for one reactive value
///
/// Typed listeners receive `E`; change listeners receive a
/// [`ReactiveChangeEvent`] for the same firing. Both kinds live in one list
/// and are invoked in registration order.
pub struct ReactiveEventRouter<E> {
    inner: Rc<RouterInner<E>>,
}

impl<E: 'static> ReactiveEventRouter<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RouterInner {
                id: RouterId::next(),
                listeners: RefCell::new(Vec::new()),
                next_slot: Cell::new(0),
            }),
        }
    }

    /// Identity of this router
    pub fn id(&self) -> RouterId {
        self.inner.id
    }

    /// Add a typed event listener
    pub fn add_listener(&self, listener: impl Fn(&E) + 'static) -> ListenerRemover {
        let slot = self.inner.push(Listener::Event(Rc::new(listener)));
        self.remover(slot)
    }

    /// Add a generic change listener
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&ReactiveChangeEvent) + 'static,
    ) -> ListenerRemover {
        let slot = self.inner.push(Listener::Change(Rc::new(listener)));
        self.remover(slot)
    }

    fn remover(&self, slot: u64) -> ListenerRemover {
        let weak: Weak<RouterInner<E>> = Rc::downgrade(&self.inner);
        ListenerRemover::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(slot);
            }
        })
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Make the computation currently running in `reactive` depend on this router
    pub fn register_read(&self, reactive: &Reactive) {
        let Some(computation) = reactive.current() else {
            return;
        };
        computation.add_dependency(self.inner.id, |invalidate| {
            self.add_change_listener(move |_| invalidate())
        });
    }

    /// Invoke every listener registered when the call starts
    pub fn fire_event(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|s| s.listener.clone())
            .collect();

        if snapshot.is_empty() {
            return;
        }

        let change = ReactiveChangeEvent { source: self.inner.id };
        for listener in snapshot {
            match listener {
                Listener::Event(f) => f(event),
                Listener::Change(f) => f(&change),
            }
        }
    }
}

impl<E: 'static> Default for ReactiveEventRouter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> ReactiveValue for ReactiveEventRouter<E> {
    fn add_reactive_change_listener(
        &self,
        listener: impl Fn(&ReactiveChangeEvent) + 'static,
    ) -> ListenerRemover {
        self.add_change_listener(listener)
    }
}

impl<E> fmt::Debug for ReactiveEventRouter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEventRouter")
            .field("id", &self.inner.id)
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}
