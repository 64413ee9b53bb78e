//! The erased primitive tree behind [`Effect`](super::Effect).
//!
//! Primitive nodes embed continuations whose success and error types differ
//! node-by-node, so the interpreter works on a single type-erased
//! representation: values cross the interpreter boundary as `Rc<dyn Any>`
//! and continuations as `Rc<dyn Fn(Erased) -> Raw>`. The typed
//! `Effect<A, E>` wrapper and its smart constructors are the only producers
//! of these nodes, which is what makes the downcasts on the way out safe.
//!
//! Nodes hold their children behind `Rc`, so cloning a description is cheap.
//! That is load-bearing: `retry` re-executes a description after failure,
//! which requires descriptions to be re-runnable values rather than one-shot
//! state machines.

use crate::cause::Cause;
use crate::env::{Env, TagKey};
use crate::fiber::FiberContext;
use crate::runtime::scheduler::RawAsyncCallback;
use crate::types::{FiberExit, FiberStatus};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

/// A type-erased value crossing the interpreter boundary.
pub(crate) type Erased = Rc<dyn Any>;

/// A fiber exit in erased form: both channels carry `Erased`.
pub(crate) type RawExit = FiberExit<Erased, Erased>;

/// A fiber status snapshot in erased form.
pub(crate) type RawStatus = FiberStatus<Erased, Erased>;

/// A failure cause over erased typed errors.
pub(crate) type RawCause = Cause<Erased>;

/// An erased success continuation.
pub(crate) type Cont = Rc<dyn Fn(Erased) -> Raw>;

/// An erased synchronous computation against the environment.
pub(crate) type SyncFn = Rc<dyn Fn(&Env) -> Erased>;

/// An erased async registration.
pub(crate) type RegisterFn = Rc<dyn Fn(&Env, RawAsyncCallback)>;

/// A factory producing a fresh future per execution.
pub(crate) type FutureFactory = Rc<dyn Fn() -> LocalFuture>;

/// The future shape the scheduler polls: erased success or typed error.
pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = Result<Erased, Erased>>>>;

/// The primitive effect nodes.
///
/// Evaluation semantics live in the interpreter; this enum is pure data.
#[derive(Clone)]
pub(crate) enum Raw {
    /// Yield the value.
    Succeed(Erased),
    /// Fail with a typed error.
    Fail(Erased),
    /// Run a synchronous computation; a panic becomes a defect.
    Sync(SyncFn),
    /// Suspend; the registration arranges a callback to resume the fiber.
    Async(RegisterFn),
    /// Suspend on a future, polled by the scheduler with a real waker.
    FromFuture(FutureFactory),
    /// Run the child, then continue with the continuation on success.
    FlatMap(Rc<Raw>, Cont),
    /// Run the child; route success to `on_ok`, the first typed failure to
    /// `on_err`; defects and interrupts bypass `on_err`.
    Fold {
        child: Rc<Raw>,
        on_err: Cont,
        on_ok: Cont,
    },
    /// Evaluate all children concurrently; gather values in input order.
    All(Vec<Raw>),
    /// First child to complete wins. With `interrupt_losers`, the rest are
    /// interrupted and drained before the winner's exit is delivered.
    Race {
        children: Vec<Raw>,
        interrupt_losers: bool,
    },
    /// Run the child, then always run the finalizer uninterruptibly.
    Ensuring(Rc<Raw>, Rc<Raw>),
    /// Cooperative delay.
    Sleep(Duration),
    /// Start the child in a new fiber; yield the handle immediately.
    Fork(Rc<Raw>),
    /// Wait for the fiber and propagate its exit.
    Join(Rc<FiberContext>),
    /// Wait for the fiber and yield its exit as a value.
    AwaitFiber(Rc<FiberContext>),
    /// Request interruption, then wait for the fiber's exit as a value.
    InterruptFiber(Rc<FiberContext>),
    /// Snapshot the fiber's status.
    StatusOf(Rc<FiberContext>),
    /// Run the child with interruptibility overridden; restored on exit.
    SetInterruptible(Rc<Raw>, bool),
    /// Cooperative safe point: fail with an interrupt cause if interrupted
    /// and interruptible, else yield unit.
    CheckInterrupt,
    /// Look up a service in the environment; missing is a defect.
    Service(TagKey),
}

/// Erases a value.
pub(crate) fn erase<T: 'static>(value: T) -> Erased {
    Rc::new(value)
}

/// Recovers a shared value of a known type.
///
/// The smart constructors are the only writers of erased values, so a type
/// mismatch here is an internal invariant violation, not a user error.
pub(crate) fn unerase_rc<T: 'static>(value: Erased) -> Rc<T> {
    match value.downcast::<T>() {
        Ok(typed) => typed,
        Err(_) => panic!(
            "fiberio internal error: erased value was not a {}",
            std::any::type_name::<T>()
        ),
    }
}

/// Recovers an owned value of a known type, cloning only if the value is
/// shared (e.g. an exit delivered to several observers).
pub(crate) fn unerase<T: Clone + 'static>(value: Erased) -> T {
    Rc::unwrap_or_clone(unerase_rc::<T>(value))
}

/// Recovers a typed exit from an erased one.
pub(crate) fn typed_exit<A, E>(exit: RawExit) -> FiberExit<A, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    match exit {
        FiberExit::Success(value) => FiberExit::Success(unerase::<A>(value)),
        FiberExit::Failure(cause) => FiberExit::Failure(cause.map(unerase::<E>)),
    }
}

/// Recovers a typed status snapshot from an erased one.
pub(crate) fn typed_status<A, E>(status: RawStatus) -> FiberStatus<A, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    match status {
        FiberStatus::Running => FiberStatus::Running,
        FiberStatus::Suspended => FiberStatus::Suspended,
        FiberStatus::Done(exit) => FiberStatus::Done(typed_exit(exit)),
    }
}
