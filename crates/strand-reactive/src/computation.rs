//! Computations
//!
//! A computation runs a closure, records which routers it read through
//! `register_read`, and is invalidated when any of them fires. Invalidated
//! computations are recomputed on the next flush of their context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::ReactiveInner;
use crate::{ListenerRemover, Reactive, RouterId};

struct ComputationInner {
    reactive: Weak<ReactiveInner>,
    compute: Box<dyn Fn(&Reactive)>,
    dependencies: RefCell<HashMap<RouterId, ListenerRemover>>,
    invalidate_listeners: RefCell<Vec<Rc<dyn Fn()>>>,
    invalidated: Cell<bool>,
    stopped: Cell<bool>,
    runs: Cell<u64>,
}

/// Re-runnable dependency-tracking closure
///
/// The values a computation depends on keep it alive, so the handle may be
/// dropped. Call [`stop`](Computation::stop) to release it for good.
#[derive(Clone)]
pub struct Computation {
    inner: Rc<ComputationInner>,
}

impl Computation {
    /// Create an invalidated computation; call [`recompute`](Self::recompute) to run it
    pub fn new(reactive: &Reactive, compute: impl Fn(&Reactive) + 'static) -> Self {
        Self {
            inner: Rc::new(ComputationInner {
                reactive: reactive.downgrade(),
                compute: Box::new(compute),
                dependencies: RefCell::new(HashMap::new()),
                invalidate_listeners: RefCell::new(Vec::new()),
                invalidated: Cell::new(true),
                stopped: Cell::new(false),
                runs: Cell::new(0),
            }),
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// How many times the closure has run
    pub fn run_count(&self) -> u64 {
        self.inner.runs.get()
    }

    /// Number of distinct routers this computation currently depends on
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Computation) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the closure if invalidated and not stopped
    pub fn recompute(&self) {
        if !self.is_invalidated() || self.is_stopped() {
            return;
        }
        let Some(reactive) = Reactive::from_weak(&self.inner.reactive) else {
            return;
        };

        self.inner.invalidated.set(false);
        self.inner.runs.set(self.inner.runs.get() + 1);
        reactive.run(self, |ctx| (self.inner.compute)(ctx));
    }

    /// Drop all dependencies, notify invalidate listeners and schedule a recompute
    pub fn invalidate(&self) {
        if self.inner.invalidated.replace(true) {
            return;
        }

        let removers: Vec<ListenerRemover> = self
            .inner
            .dependencies
            .borrow_mut()
            .drain()
            .map(|(_, remover)| remover)
            .collect();
        for remover in removers {
            remover.remove();
        }

        let listeners = self.inner.invalidate_listeners.borrow().clone();
        for listener in listeners {
            listener();
        }

        if self.is_stopped() {
            return;
        }
        if let Some(reactive) = Reactive::from_weak(&self.inner.reactive) {
            let computation = self.clone();
            reactive.add_flush_listener(move || computation.recompute());
        }
    }

    /// Stop tracking for good; the closure never runs again
    pub fn stop(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        if self.is_invalidated() {
            let removers: Vec<ListenerRemover> = self
                .inner
                .dependencies
                .borrow_mut()
                .drain()
                .map(|(_, remover)| remover)
                .collect();
            removers.into_iter().for_each(ListenerRemover::remove);
        } else {
            self.invalidate();
        }
    }

    /// Add a listener invoked each time this computation is invalidated
    pub fn add_invalidate_listener(&self, listener: impl Fn() + 'static) {
        self.inner
            .invalidate_listeners
            .borrow_mut()
            .push(Rc::new(listener));
    }

    /// Register a dependency on `router` unless already present
    ///
    /// `subscribe` receives the invalidation callback and must return the
    /// remover for the change listener it installed.
    pub(crate) fn add_dependency(
        &self,
        router: RouterId,
        subscribe: impl FnOnce(Rc<dyn Fn()>) -> ListenerRemover,
    ) {
        if self.is_invalidated() || self.inner.dependencies.borrow().contains_key(&router) {
            return;
        }

        // The change listener owns the computation while the dependency lasts
        let computation = self.clone();
        let invalidate: Rc<dyn Fn()> = Rc::new(move || computation.invalidate());
        let remover = subscribe(invalidate);
        self.inner.dependencies.borrow_mut().insert(router, remover);
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("invalidated", &self.is_invalidated())
            .field("stopped", &self.is_stopped())
            .field("dependencies", &self.dependency_count())
            .field("runs", &self.run_count())
            .finish()
    }
}
