//! Fiber handles and per-fiber state.
//!
//! A fiber is an independently schedulable unit of cooperative execution.
//! Its mutable state lives in a `FiberContext`: the lifecycle status, the
//! observer list, the monotonic interruption flag, and the current
//! interruptibility. The interpreter owns the context; other fibers hold it
//! by shared reference for observation and interruption.
//!
//! All context mutation happens on the scheduler thread, so plain `Cell`/
//! `RefCell` interior mutability suffices. A port to a multi-threaded
//! scheduler would need a concurrent observer list and a membership check
//! inside `done` to keep notification at-most-once under races.

use crate::cause::Cause;
use crate::effect::raw::{RawExit, RawStatus};
use crate::tracing_compat::trace;
use crate::types::{FiberExit, FiberId, FiberStatus};
use core::fmt;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

/// A callback invoked exactly once with the fiber's exit.
pub(crate) type Observer = Box<dyn FnOnce(RawExit)>;

/// Key returned by observer registration; passing it back removes the
/// observer idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObserverKey(u64);

impl ObserverKey {
    /// Key returned when the callback already ran synchronously, so there is
    /// nothing to unsubscribe.
    pub(crate) const DEAD: Self = Self(0);
}

struct ObserverSlot {
    key: u64,
    callback: Observer,
}

/// Per-fiber mutable state.
///
/// Lifecycle: `Running → Suspended → Running* → Done`; `Done` is terminal
/// and first-writer-wins. Observers are notified exactly once, in
/// registration order, when the fiber completes.
pub(crate) struct FiberContext {
    id: FiberId,
    status: RefCell<RawStatus>,
    observers: RefCell<SmallVec<[ObserverSlot; 2]>>,
    next_observer_key: Cell<u64>,
    /// Monotonic: once set, stays set.
    interrupted: Cell<bool>,
    interruptible: Cell<bool>,
}

impl FiberContext {
    pub(crate) fn new(id: FiberId) -> Self {
        Self {
            id,
            status: RefCell::new(FiberStatus::Running),
            observers: RefCell::new(SmallVec::new()),
            next_observer_key: Cell::new(1),
            interrupted: Cell::new(false),
            interruptible: Cell::new(true),
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(*self.status.borrow(), FiberStatus::Done(_))
    }

    /// Returns the exit if the fiber has completed.
    pub(crate) fn exit(&self) -> Option<RawExit> {
        match &*self.status.borrow() {
            FiberStatus::Done(exit) => Some(exit.clone()),
            _ => None,
        }
    }

    /// Snapshot of the current status.
    pub(crate) fn status_snapshot(&self) -> RawStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn set_running(&self) {
        let mut status = self.status.borrow_mut();
        if !matches!(*status, FiberStatus::Done(_)) {
            *status = FiberStatus::Running;
        }
    }

    pub(crate) fn set_suspended(&self) {
        let mut status = self.status.borrow_mut();
        if !matches!(*status, FiberStatus::Done(_)) {
            *status = FiberStatus::Suspended;
        }
    }

    /// Registers an observer for the fiber's exit.
    ///
    /// If the fiber is already done, the callback runs synchronously and the
    /// dead key is returned. Otherwise the callback is appended and will run
    /// exactly once when the fiber completes.
    pub(crate) fn add_observer(&self, callback: Observer) -> ObserverKey {
        if let Some(exit) = self.exit() {
            callback(exit);
            return ObserverKey::DEAD;
        }
        let key = self.next_observer_key.get();
        self.next_observer_key.set(key + 1);
        self.observers
            .borrow_mut()
            .push(ObserverSlot { key, callback });
        ObserverKey(key)
    }

    /// Removes a registered observer. Unknown or already-drained keys are a
    /// no-op, so unsubscribing is idempotent.
    #[allow(dead_code)]
    pub(crate) fn remove_observer(&self, key: ObserverKey) {
        if key == ObserverKey::DEAD {
            return;
        }
        self.observers.borrow_mut().retain(|slot| slot.key != key.0);
    }

    /// Transitions to `Done(exit)`.
    ///
    /// Only the first call wins; later calls are no-ops. Observers are
    /// drained and invoked exactly once, in registration order.
    pub(crate) fn done(&self, exit: RawExit) -> bool {
        {
            let mut status = self.status.borrow_mut();
            if matches!(*status, FiberStatus::Done(_)) {
                return false;
            }
            *status = FiberStatus::Done(exit.clone());
        }
        trace!(fiber = %self.id, "fiber done");
        let drained: SmallVec<[ObserverSlot; 2]> =
            self.observers.borrow_mut().drain(..).collect();
        for slot in drained {
            (slot.callback)(exit.clone());
        }
        true
    }

    /// Requests interruption.
    ///
    /// Idempotent; the interrupted flag is monotonic. If the fiber is
    /// currently interruptible and not yet done, it completes immediately
    /// with an interrupt cause. Otherwise the flag latches and is consumed
    /// at the next interruption check point.
    pub(crate) fn interrupt(&self) {
        self.interrupted.set(true);
        if self.interruptible.get() && !self.is_done() {
            trace!(fiber = %self.id, "fiber interrupted");
            self.done(FiberExit::Failure(Cause::interrupt(self.id)));
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.get()
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.interruptible.get()
    }

    pub(crate) fn set_interruptible(&self, flag: bool) {
        self.interruptible.set(flag);
    }
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .field("interrupted", &self.interrupted.get())
            .field("interruptible", &self.interruptible.get())
            .finish()
    }
}

/// A typed handle to a running fiber.
///
/// Handles are cheap to clone and identify the same underlying fiber. Use
/// the effect-level operators ([`Effect::join_fiber`](crate::effect::Effect::join_fiber),
/// [`Effect::await_fiber`](crate::effect::Effect::await_fiber),
/// [`Effect::interrupt_fiber`](crate::effect::Effect::interrupt_fiber),
/// [`Effect::fiber_status`](crate::effect::Effect::fiber_status)) to
/// observe or cancel it.
pub struct Fiber<A, E> {
    pub(crate) ctx: Rc<FiberContext>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Fiber<A, E> {
    pub(crate) fn from_ctx(ctx: Rc<FiberContext>) -> Self {
        Self {
            ctx,
            _marker: PhantomData,
        }
    }

    /// Returns the fiber's unique identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.ctx.id()
    }
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            ctx: Rc::clone(&self.ctx),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::raw::erase;

    fn context() -> FiberContext {
        FiberContext::new(FiberId::next())
    }

    fn success(n: i32) -> RawExit {
        FiberExit::Success(erase(n))
    }

    // =========================================================================
    // done: first writer wins, observers exactly once in order
    // =========================================================================

    #[test]
    fn done_is_first_writer_wins() {
        let ctx = context();
        assert!(ctx.done(success(1)));
        assert!(!ctx.done(success(2)));
        assert!(ctx.is_done());
    }

    #[test]
    fn observers_run_in_registration_order() {
        let ctx = context();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            ctx.add_observer(Box::new(move |_| order.borrow_mut().push(label)));
        }
        ctx.done(success(0));
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn observer_added_after_done_runs_synchronously() {
        let ctx = context();
        ctx.done(success(7));

        let seen = Rc::new(Cell::new(false));
        let seen_clone = Rc::clone(&seen);
        let key = ctx.add_observer(Box::new(move |exit| {
            seen_clone.set(matches!(exit, FiberExit::Success(_)));
        }));
        assert!(seen.get());
        assert_eq!(key, ObserverKey::DEAD);
    }

    #[test]
    fn second_done_does_not_renotify() {
        let ctx = context();
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        ctx.add_observer(Box::new(move |_| count_clone.set(count_clone.get() + 1)));
        ctx.done(success(1));
        ctx.done(success(2));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn remove_observer_is_idempotent() {
        let ctx = context();
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        let key = ctx.add_observer(Box::new(move |_| count_clone.set(count_clone.get() + 1)));
        ctx.remove_observer(key);
        ctx.remove_observer(key);
        ctx.done(success(1));
        assert_eq!(count.get(), 0);
    }

    // =========================================================================
    // interrupt
    // =========================================================================

    #[test]
    fn interrupt_completes_interruptible_fiber() {
        let ctx = context();
        ctx.interrupt();
        let exit = ctx.exit().expect("interrupted fiber is done");
        match exit {
            FiberExit::Failure(cause) => assert_eq!(cause.interruptors(), vec![ctx.id()]),
            FiberExit::Success(_) => panic!("expected interrupt failure"),
        }
    }

    #[test]
    fn interrupt_latches_while_uninterruptible() {
        let ctx = context();
        ctx.set_interruptible(false);
        ctx.interrupt();
        assert!(ctx.is_interrupted());
        assert!(!ctx.is_done());

        // The flag is monotonic and survives repeated requests.
        ctx.interrupt();
        assert!(ctx.is_interrupted());
        assert!(!ctx.is_done());
    }

    #[test]
    fn interrupt_after_done_is_a_no_op() {
        let ctx = context();
        ctx.done(success(3));
        ctx.interrupt();
        match ctx.exit().expect("done") {
            FiberExit::Success(_) => {}
            FiberExit::Failure(_) => panic!("exit must not change after done"),
        }
    }

    // =========================================================================
    // status
    // =========================================================================

    #[test]
    fn status_transitions_are_observable() {
        let ctx = context();
        assert!(matches!(ctx.status_snapshot(), FiberStatus::Running));
        ctx.set_suspended();
        assert!(matches!(ctx.status_snapshot(), FiberStatus::Suspended));
        ctx.set_running();
        assert!(matches!(ctx.status_snapshot(), FiberStatus::Running));
        ctx.done(success(1));
        assert!(matches!(ctx.status_snapshot(), FiberStatus::Done(_)));

        // Done is stable.
        ctx.set_suspended();
        assert!(matches!(ctx.status_snapshot(), FiberStatus::Done(_)));
    }
}
