//! Reactive Context
//!
//! Replaces an implicit "current computation" global with an explicit
//! handle passed to every tracked read.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::Computation;

type Task = Box<dyn FnOnce()>;

pub(crate) struct ReactiveInner {
    current: RefCell<Option<Computation>>,
    flush_listeners: RefCell<Vec<Task>>,
    post_flush_listeners: RefCell<Vec<Task>>,
    flushing: Cell<bool>,
}

/// Reactive context for one state tree
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Reactive {
    pub(crate) inner: Rc<ReactiveInner>,
}

impl Reactive {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ReactiveInner {
                current: RefCell::new(None),
                flush_listeners: RefCell::new(Vec::new()),
                post_flush_listeners: RefCell::new(Vec::new()),
                flushing: Cell::new(false),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<ReactiveInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<ReactiveInner> {
        Rc::downgrade(&self.inner)
    }

    /// The computation currently collecting dependencies, if any
    pub fn current(&self) -> Option<Computation> {
        self.inner.current.borrow().clone()
    }

    /// Run `f` with `computation` as the current computation
    ///
    /// The previous current computation is restored afterwards, so runs nest.
    pub fn run<R>(&self, computation: &Computation, f: impl FnOnce(&Reactive) -> R) -> R {
        let previous = self.inner.current.replace(Some(computation.clone()));
        let result = f(self);
        *self.inner.current.borrow_mut() = previous;
        result
    }

    /// Run `f` without any current computation
    pub fn untracked<R>(&self, f: impl FnOnce(&Reactive) -> R) -> R {
        let previous = self.inner.current.replace(None);
        let result = f(self);
        *self.inner.current.borrow_mut() = previous;
        result
    }

    /// Create a computation and run it immediately
    pub fn run_when_dependencies_change(&self, f: impl Fn(&Reactive) + 'static) -> Computation {
        let computation = Computation::new(self, f);
        computation.recompute();
        computation
    }

    /// Queue a task for the next [`flush`](Self::flush)
    pub fn add_flush_listener(&self, task: impl FnOnce() + 'static) {
        self.inner.flush_listeners.borrow_mut().push(Box::new(task));
    }

    /// Queue a task that runs once all flush listeners have settled
    pub fn add_post_flush_listener(&self, task: impl FnOnce() + 'static) {
        self.inner.post_flush_listeners.borrow_mut().push(Box::new(task));
    }

    /// Whether any task is waiting for a flush
    pub fn has_pending_flush(&self) -> bool {
        !self.inner.flush_listeners.borrow().is_empty()
            || !self.inner.post_flush_listeners.borrow().is_empty()
    }

    /// Run queued flush tasks until none remain, then post-flush tasks
    ///
    /// Post-flush tasks may queue new flush tasks; the loop continues until
    /// both queues are empty. A nested call while flushing returns at once.
    pub fn flush(&self) {
        if self.inner.flushing.replace(true) {
            return;
        }

        let mut rounds = 0usize;
        loop {
            let pending = std::mem::take(&mut *self.inner.flush_listeners.borrow_mut());
            if !pending.is_empty() {
                rounds += 1;
                for task in pending {
                    task();
                }
                continue;
            }

            let post = std::mem::take(&mut *self.inner.post_flush_listeners.borrow_mut());
            if post.is_empty() {
                break;
            }
            for task in post {
                task();
            }
        }

        tracing::trace!(rounds, "reactive flush complete");
        self.inner.flushing.set(false);
    }
}

impl Default for Reactive {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("has_current", &self.inner.current.borrow().is_some())
            .field("flushing", &self.inner.flushing.get())
            .finish()
    }
}
