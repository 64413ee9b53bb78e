//! The effect algebra.
//!
//! An [`Effect<A, E>`] is an immutable description of a computation that
//! runs against an environment, fails with a typed error `E`, or succeeds
//! with an `A`. Descriptions are values: composing them allocates a tree of
//! primitive nodes and runs nothing. A [`Runtime`](crate::runtime::Runtime)
//! interprets the tree on cooperative fibers.
//!
//! The surface splits into:
//!
//! - **creation**: [`succeed`](Effect::succeed), [`fail`](Effect::fail),
//!   [`sync`](Effect::sync), [`from_async`](Effect::from_async),
//!   [`from_future`](Effect::from_future), [`from_either`](Effect::from_either),
//!   [`sleep`](Effect::sleep), [`service`](Effect::service)
//! - **sequencing**: [`map`](Effect::map), [`flat_map`](Effect::flat_map),
//!   [`fold_m`](Effect::fold_m) and the derived operators in
//!   [`combinator`](self)
//!
//! Two renames versus the conventional vocabulary, forced by Rust keywords:
//! `async` is spelled [`from_async`](Effect::from_async) and `as` is spelled
//! [`as_value`](Effect::as_value).
//!
//! # Laziness
//!
//! ```
//! use fiberio::effect::Effect;
//! use fiberio::runtime::Runtime;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let ran = Rc::new(Cell::new(false));
//! let ran_probe = Rc::clone(&ran);
//! let effect = Effect::<i32, String>::sync(move |_| {
//!     ran_probe.set(true);
//!     1
//! });
//!
//! // Nothing has run yet.
//! assert!(!ran.get());
//! assert_eq!(Runtime::default().unsafe_run(effect), 1);
//! assert!(ran.get());
//! ```

pub(crate) mod raw;

mod combinator;

use crate::env::{Env, Tag};
use crate::runtime::scheduler::RawAsyncCallback;
use crate::types::Either;
use raw::{erase, unerase, unerase_rc, Erased, FutureFactory, LocalFuture, Raw, RegisterFn, SyncFn};
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

/// A lazy, immutable description of a computation.
///
/// `A` is the success type and `E` the typed error. Both must be `Clone`
/// because descriptions are re-runnable (`retry`) and exits may be delivered
/// to several observers.
pub struct Effect<A, E> {
    raw: Raw,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> Effect<A, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    pub(crate) fn from_raw(raw: Raw) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_raw(self) -> Raw {
        self.raw
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// An effect that immediately yields the value.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::from_raw(Raw::Succeed(erase(value)))
    }

    /// An effect that immediately fails with the typed error.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::from_raw(Raw::Fail(erase(error)))
    }

    /// Lifts a synchronous computation against the environment.
    ///
    /// The closure runs when the effect is interpreted, once per execution.
    /// A panic inside the closure becomes a defect (`Cause::Die`), not a
    /// typed error.
    #[must_use]
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Env) -> A + 'static,
    {
        let f: SyncFn = Rc::new(move |env| erase(f(env)));
        Self::from_raw(Raw::Sync(f))
    }

    /// Lifts a callback-based asynchronous operation.
    ///
    /// `register` is invoked once per execution, at the suspension point,
    /// with the environment and a handle whose `resolve`/`reject` methods
    /// resume the fiber. Resumption is at-most-once even if both callbacks
    /// fire; a panic inside `register` becomes a defect.
    #[must_use]
    pub fn from_async<F>(register: F) -> Self
    where
        F: Fn(&Env, AsyncHandle<A, E>) + 'static,
    {
        let register: RegisterFn = Rc::new(move |env, callback| {
            register(
                env,
                AsyncHandle {
                    inner: callback,
                    _marker: PhantomData,
                },
            );
        });
        Self::from_raw(Raw::Async(register))
    }

    /// Adapts a [`Future`] into an effect.
    ///
    /// The factory produces a fresh future per execution (so the effect
    /// stays re-runnable under `retry`). The scheduler polls the future with
    /// a real waker; wakes may arrive from other threads.
    #[must_use]
    pub fn from_future<Fut, F>(factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<A, E>> + 'static,
    {
        let factory: FutureFactory = Rc::new(move || {
            let future = factory();
            let boxed: LocalFuture = Box::pin(async move { future.await.map(erase).map_err(erase) });
            boxed
        });
        Self::from_raw(Raw::FromFuture(factory))
    }

    /// Lifts an [`Either`] into the error/success channels: `Left` fails,
    /// `Right` succeeds.
    #[must_use]
    pub fn from_either(either: Either<E, A>) -> Self {
        either.fold(Self::fail, Self::succeed)
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Transforms the success value.
    ///
    /// ```
    /// use fiberio::effect::Effect;
    /// use fiberio::runtime::Runtime;
    ///
    /// let effect = Effect::<i32, String>::succeed(20).map(|x| x + 1);
    /// assert_eq!(Runtime::default().unsafe_run(effect), 21);
    /// ```
    #[must_use]
    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Clone + 'static,
        F: Fn(A) -> B + 'static,
    {
        self.flat_map(move |value| Effect::succeed(f(value)))
    }

    /// Runs this effect, then continues with the effect returned by `k`.
    ///
    /// Failures short-circuit: `k` is not consulted when this effect fails.
    #[must_use]
    pub fn flat_map<B, K>(self, k: K) -> Effect<B, E>
    where
        B: Clone + 'static,
        K: Fn(A) -> Effect<B, E> + 'static,
    {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(self.raw),
            Rc::new(move |value| k(unerase::<A>(value)).raw),
        ))
    }

    /// Runs this effect and routes the outcome: success to `on_ok`, the
    /// first typed failure to `on_err`.
    ///
    /// Defects and interrupts bypass `on_err` and propagate unchanged; only
    /// `Cause::Fail` is recoverable here. This is the primitive the whole
    /// error-handling vocabulary desugars to.
    #[must_use]
    pub fn fold_m<B, E2, FE, FA>(self, on_err: FE, on_ok: FA) -> Effect<B, E2>
    where
        B: Clone + 'static,
        E2: Clone + 'static,
        FE: Fn(E) -> Effect<B, E2> + 'static,
        FA: Fn(A) -> Effect<B, E2> + 'static,
    {
        Effect::from_raw(Raw::Fold {
            child: Rc::new(self.raw),
            on_err: Rc::new(move |error| on_err(unerase::<E>(error)).raw),
            on_ok: Rc::new(move |value| on_ok(unerase::<A>(value)).raw),
        })
    }
}

impl<E> Effect<(), E>
where
    E: Clone + 'static,
{
    /// Cooperative delay of at least the given duration.
    ///
    /// On the wall-clock runtime the fiber resumes no earlier than the
    /// deadline; on the virtual-clock runtime, exactly at it.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::from_raw(Raw::Sleep(duration))
    }

    /// A cooperative safe point: fails with an interrupt cause if this
    /// fiber has a pending interrupt and is interruptible, else yields unit.
    ///
    /// Useful inside long synchronous regions, which are otherwise not
    /// interruptible.
    #[must_use]
    pub fn check_interrupt() -> Self {
        Self::from_raw(Raw::CheckInterrupt)
    }
}

impl<S, E> Effect<Rc<S>, E>
where
    S: 'static,
    E: Clone + 'static,
{
    /// Accesses the service bound under the tag.
    ///
    /// A missing service is a defect: requiring a service the runtime was
    /// never given is a wiring bug, not an anticipated error.
    #[must_use]
    pub fn service(tag: &Tag<S>) -> Self {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::Service(tag.key())),
            Rc::new(|service: Erased| Raw::Succeed(erase(unerase_rc::<S>(service)))),
        ))
    }
}

impl<A, E> Effect<Effect<A, E>, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    /// Collapses one layer of nesting.
    #[must_use]
    pub fn flatten(self) -> Effect<A, E> {
        self.flat_map(|inner| inner)
    }
}

impl<A, E> Effect<Either<E, A>, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    /// Lifts an inner [`Either`] into the error/success channels.
    #[must_use]
    pub fn absolve(self) -> Effect<A, E> {
        self.flat_map(|either| either.fold(Effect::fail, Effect::succeed))
    }
}

/// The resumption handle passed to [`Effect::from_async`] registrations.
///
/// Cloneable; whichever of `resolve`/`reject` fires first wins, and later
/// calls on any clone are ignored.
pub struct AsyncHandle<A, E> {
    inner: RawAsyncCallback,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for AsyncHandle<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> AsyncHandle<A, E>
where
    A: 'static,
    E: 'static,
{
    /// Resumes the suspended fiber with a success value.
    pub fn resolve(&self, value: A) {
        self.inner.resolve_erased(erase(value));
    }

    /// Resumes the suspended fiber with a typed failure.
    pub fn reject(&self, error: E) {
        self.inner.reject_erased(erase(error));
    }
}

impl<A, E> core::fmt::Debug for AsyncHandle<A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AsyncHandle({})", self.inner.fiber_id())
    }
}
