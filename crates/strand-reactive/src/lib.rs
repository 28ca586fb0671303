//! Strand Reactive - change tracking primitives
//!
//! Publish/subscribe building blocks for the state tree:
//! - [`ReactiveEventRouter`]: ordered listener list with one firing path for
//!   typed domain events and generic change notifications
//! - [`Computation`]: a closure that is re-run when any value it read changes
//! - [`Reactive`]: explicit context carrying the currently running computation
//!   and the flush queue
//!
//! Everything is single-threaded (`Rc`/`RefCell`). A tree and its context are
//! owned by one session and accessed by one caller at a time.

mod computation;
mod context;
mod router;

pub use computation::Computation;
pub use context::Reactive;
pub use router::{ListenerRemover, ReactiveChangeEvent, ReactiveEventRouter, RouterId};

/// A value that notifies listeners when it changes
pub trait ReactiveValue {
    /// Add a listener invoked on every change of this value
    fn add_reactive_change_listener(
        &self,
        listener: impl Fn(&ReactiveChangeEvent) + 'static,
    ) -> ListenerRemover;
}
