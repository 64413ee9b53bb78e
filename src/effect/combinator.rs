//! The derived operator surface.
//!
//! Everything here desugars to the primitive nodes in [`raw`](super::raw):
//! error handling goes through `Fold`, parallel operators through `All` and
//! `Race`, timing through `Sleep`, resources through `Ensuring`, and the
//! fiber vocabulary through the fork/wait primitives. Keeping the surface
//! derived keeps the interpreter small: it only ever sees the primitive set.
//!
//! # Race vs `race_first`
//!
//! Both resolve to the first completion in wall-clock order (ties broken by
//! argument order), but they treat losers differently:
//!
//! - [`race`](super::Effect::race) leaves losers running; their exits are
//!   discarded.
//! - [`race_first`](super::Effect::race_first) interrupts losers and waits
//!   for them to drain before delivering the winner's exit, so no loser
//!   side effect survives past the winner's completion.

use super::raw::{erase, typed_exit, typed_status, unerase, unerase_rc, Erased, Raw, RawExit, RawStatus};
use super::Effect;
use crate::fiber::{Fiber, FiberContext};
use crate::types::{FiberExit, FiberStatus};
use std::rc::Rc;
use std::time::Duration;

impl<A, E> Effect<A, E>
where
    A: Clone + 'static,
    E: Clone + 'static,
{
    // =========================================================================
    // Error handling
    // =========================================================================

    /// Transforms the typed error.
    ///
    /// Desugars to `fold_m`, so the resulting cause is the single rewritten
    /// error; defects and interrupts pass through untouched.
    #[must_use]
    pub fn map_error<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Clone + 'static,
        F: Fn(E) -> E2 + 'static,
    {
        self.fold_m(move |error| Effect::fail(f(error)), Effect::succeed)
    }

    /// Transforms both channels at once.
    #[must_use]
    pub fn map_both<B, E2, FE, FA>(self, on_err: FE, on_ok: FA) -> Effect<B, E2>
    where
        B: Clone + 'static,
        E2: Clone + 'static,
        FE: Fn(E) -> E2 + 'static,
        FA: Fn(A) -> B + 'static,
    {
        self.fold_m(
            move |error| Effect::fail(on_err(error)),
            move |value| Effect::succeed(on_ok(value)),
        )
    }

    /// Recovers from a typed failure with the fallback effect.
    ///
    /// Triggers only on `Cause::Fail`; defects and interrupts propagate.
    ///
    /// ```
    /// use fiberio::effect::Effect;
    /// use fiberio::runtime::Runtime;
    ///
    /// let effect = Effect::<i32, String>::fail("nope".into())
    ///     .or_else(Effect::<i32, String>::succeed(2));
    /// assert_eq!(Runtime::default().unsafe_run(effect), 2);
    /// ```
    #[must_use]
    pub fn or_else<E2>(self, fallback: Effect<A, E2>) -> Effect<A, E2>
    where
        E2: Clone + 'static,
    {
        self.fold_m(move |_| fallback.clone(), Effect::succeed)
    }

    /// Retries a failing effect up to `attempts` more times.
    ///
    /// `retry(0)` is the effect itself; `retry(n)` performs at most `n + 1`
    /// attempts before surfacing the last failure.
    #[must_use]
    pub fn retry(self, attempts: u32) -> Effect<A, E> {
        if attempts == 0 {
            self
        } else {
            self.clone().or_else(self.retry(attempts - 1))
        }
    }

    /// Collapses both outcomes to a value with pure functions, removing the
    /// failure channel.
    #[must_use]
    pub fn fold<B, E2, FE, FA>(self, on_err: FE, on_ok: FA) -> Effect<B, E2>
    where
        B: Clone + 'static,
        E2: Clone + 'static,
        FE: Fn(E) -> B + 'static,
        FA: Fn(A) -> B + 'static,
    {
        self.fold_m(
            move |error| Effect::succeed(on_err(error)),
            move |value| Effect::succeed(on_ok(value)),
        )
    }

    /// Swaps the error and success channels.
    #[must_use]
    pub fn flip(self) -> Effect<E, A> {
        self.fold_m(Effect::succeed, Effect::fail)
    }

    /// Applies a transformation to the flipped effect, then flips back.
    #[must_use]
    pub fn flip_with<A2, E2, F>(self, f: F) -> Effect<A2, E2>
    where
        A2: Clone + 'static,
        E2: Clone + 'static,
        F: FnOnce(Effect<E, A>) -> Effect<E2, A2>,
    {
        f(self.flip()).flip()
    }

    /// Sequences a new effect from the error channel; its success becomes
    /// the replacement error.
    #[must_use]
    pub fn flat_map_error<E2, K>(self, k: K) -> Effect<A, E2>
    where
        E2: Clone + 'static,
        K: Fn(E) -> Effect<E2, E2> + 'static,
    {
        self.fold_m(move |error| k(error).flat_map(Effect::fail), Effect::succeed)
    }

    /// Widens the error type through [`From`]. Purely a type-level
    /// conversion; the failure structure is otherwise unchanged.
    #[must_use]
    pub fn augment_error<E2>(self) -> Effect<A, E2>
    where
        E2: From<E> + Clone + 'static,
    {
        self.map_error(E2::from)
    }

    // =========================================================================
    // Tapping
    // =========================================================================

    /// Runs `k` on the success value for its effect, preserving the value.
    #[must_use]
    pub fn tap<B, K>(self, k: K) -> Effect<A, E>
    where
        B: Clone + 'static,
        K: Fn(A) -> Effect<B, E> + 'static,
    {
        self.flat_map(move |value| k(value.clone()).as_value(value))
    }

    /// Runs `k` on the typed error for its effect, preserving the failure.
    #[must_use]
    pub fn tap_error<B, K>(self, k: K) -> Effect<A, E>
    where
        B: Clone + 'static,
        K: Fn(E) -> Effect<B, E> + 'static,
    {
        self.fold_m(
            move |error| {
                let original = error.clone();
                k(error).flat_map(move |_| Effect::fail(original.clone()))
            },
            Effect::succeed,
        )
    }

    /// Taps both channels, preserving the original outcome.
    #[must_use]
    pub fn tap_both<B, C, KE, KA>(self, on_err: KE, on_ok: KA) -> Effect<A, E>
    where
        B: Clone + 'static,
        C: Clone + 'static,
        KE: Fn(E) -> Effect<B, E> + 'static,
        KA: Fn(A) -> Effect<C, E> + 'static,
    {
        self.fold_m(
            move |error| {
                let original = error.clone();
                on_err(error).flat_map(move |_| Effect::fail(original.clone()))
            },
            move |value| on_ok(value.clone()).as_value(value),
        )
    }

    // =========================================================================
    // Combinators
    // =========================================================================

    /// Replaces the success value.
    #[must_use]
    pub fn as_value<B>(self, value: B) -> Effect<B, E>
    where
        B: Clone + 'static,
    {
        self.map(move |_| value.clone())
    }

    /// Discards the success value.
    #[must_use]
    pub fn unit(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Runs both effects concurrently and pairs their results.
    #[must_use]
    pub fn zip<B>(self, that: Effect<B, E>) -> Effect<(A, B), E>
    where
        B: Clone + 'static,
    {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::All(vec![self.into_raw(), that.into_raw()])),
            Rc::new(|values: Erased| {
                let mut values = unerase::<Vec<Erased>>(values).into_iter();
                let first = values.next().expect("zip gathers two results");
                let second = values.next().expect("zip gathers two results");
                Raw::Succeed(erase((unerase::<A>(first), unerase::<B>(second))))
            }),
        ))
    }

    /// Runs both effects concurrently and combines their results.
    #[must_use]
    pub fn zip_with<B, C, F>(self, that: Effect<B, E>, f: F) -> Effect<C, E>
    where
        B: Clone + 'static,
        C: Clone + 'static,
        F: Fn(A, B) -> C + 'static,
    {
        self.zip(that).map(move |(a, b)| f(a, b))
    }

    /// Runs both effects concurrently, keeping the left result.
    #[must_use]
    pub fn zip_left<B>(self, that: Effect<B, E>) -> Effect<A, E>
    where
        B: Clone + 'static,
    {
        self.zip(that).map(|(a, _)| a)
    }

    /// Runs both effects concurrently, keeping the right result.
    #[must_use]
    pub fn zip_right<B>(self, that: Effect<B, E>) -> Effect<B, E>
    where
        B: Clone + 'static,
    {
        self.zip(that).map(|(_, b)| b)
    }

    /// Evaluates all effects concurrently, gathering values in input order
    /// regardless of completion order.
    ///
    /// If any effect fails, the still-running siblings are interrupted,
    /// everything is drained, and the non-empty causes combine with `Both`
    /// in input order.
    #[must_use]
    pub fn all(effects: Vec<Effect<A, E>>) -> Effect<Vec<A>, E> {
        let children = effects.into_iter().map(Effect::into_raw).collect();
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::All(children)),
            Rc::new(|values: Erased| {
                let values: Vec<A> = unerase::<Vec<Erased>>(values)
                    .into_iter()
                    .map(unerase::<A>)
                    .collect();
                Raw::Succeed(erase(values))
            }),
        ))
    }

    /// Races two effects; the first completion wins and its exit propagates.
    /// The loser keeps running; its exit is discarded.
    #[must_use]
    pub fn race(self, that: Effect<A, E>) -> Effect<A, E> {
        Effect::from_raw(Raw::Race {
            children: vec![self.into_raw(), that.into_raw()],
            interrupt_losers: false,
        })
    }

    /// Races two effects; the loser is interrupted and drained before the
    /// winner's exit is delivered.
    #[must_use]
    pub fn race_first(self, that: Effect<A, E>) -> Effect<A, E> {
        Effect::from_raw(Raw::Race {
            children: vec![self.into_raw(), that.into_raw()],
            interrupt_losers: true,
        })
    }

    /// Races any number of effects without interrupting losers. Ties are
    /// broken by input order.
    #[must_use]
    pub fn race_all(effects: Vec<Effect<A, E>>) -> Effect<A, E> {
        Effect::from_raw(Raw::Race {
            children: effects.into_iter().map(Effect::into_raw).collect(),
            interrupt_losers: false,
        })
    }

    /// Races any number of effects, interrupting and draining the losers.
    #[must_use]
    pub fn race_first_all(effects: Vec<Effect<A, E>>) -> Effect<A, E> {
        Effect::from_raw(Raw::Race {
            children: effects.into_iter().map(Effect::into_raw).collect(),
            interrupt_losers: true,
        })
    }

    // =========================================================================
    // Timing
    // =========================================================================

    /// Runs this effect after a cooperative delay.
    #[must_use]
    pub fn delay(self, duration: Duration) -> Effect<A, E> {
        Effect::<(), E>::sleep(duration).flat_map(move |()| self.clone())
    }

    /// Yields `Some(value)` if this effect completes within the duration,
    /// else `None`; on timeout the effect's fiber is interrupted.
    ///
    /// ```
    /// use fiberio::effect::Effect;
    /// use fiberio::runtime::Runtime;
    /// use std::time::Duration;
    ///
    /// let slow = Effect::<i32, String>::succeed(1).delay(Duration::from_millis(50));
    /// let result = Runtime::lab().unsafe_run(slow.timeout(Duration::from_millis(10)));
    /// assert_eq!(result, None);
    /// ```
    #[must_use]
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E> {
        self.map(Some)
            .race_first(Effect::<(), E>::sleep(duration).as_value(None))
    }

    // =========================================================================
    // Resources / finalization
    // =========================================================================

    /// Guarantees the finalizer runs after this effect, whatever the
    /// outcome, with interruption disabled.
    ///
    /// The finalizer's success value is discarded. If both this effect and
    /// the finalizer fail, the exit carries `Then(primary, finalizer)`.
    #[must_use]
    pub fn ensuring<B>(self, finalizer: Effect<B, E>) -> Effect<A, E>
    where
        B: Clone + 'static,
    {
        Effect::from_raw(Raw::Ensuring(
            Rc::new(self.into_raw()),
            Rc::new(finalizer.into_raw()),
        ))
    }

    // =========================================================================
    // Interruptibility
    // =========================================================================

    /// Runs this effect with interruption disabled; the previous flag is
    /// restored on every exit path. A pending interrupt latches and re-fires
    /// once the region completes.
    #[must_use]
    pub fn uninterruptible(self) -> Effect<A, E> {
        Effect::from_raw(Raw::SetInterruptible(Rc::new(self.into_raw()), false))
    }

    /// Runs this effect with interruption enabled, restoring the previous
    /// flag on exit.
    #[must_use]
    pub fn interruptible(self) -> Effect<A, E> {
        Effect::from_raw(Raw::SetInterruptible(Rc::new(self.into_raw()), true))
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    /// Starts this effect in a new fiber and yields the handle immediately.
    ///
    /// The child begins running strictly after the forking fiber's current
    /// reduction completes, never synchronously inside the fork.
    #[must_use]
    pub fn fork(self) -> Effect<Fiber<A, E>, E> {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::Fork(Rc::new(self.into_raw()))),
            Rc::new(|handle: Erased| {
                let ctx = unerase_rc::<FiberContext>(handle);
                Raw::Succeed(erase(Fiber::<A, E>::from_ctx(ctx)))
            }),
        ))
    }

    /// Forks every effect, yielding the handles in input order.
    #[must_use]
    pub fn fork_all(effects: Vec<Effect<A, E>>) -> Effect<Vec<Fiber<A, E>>, E> {
        effects
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |acc, effect| {
                acc.flat_map(move |handles: Vec<Fiber<A, E>>| {
                    effect.clone().fork().map(move |handle| {
                        let mut handles = handles.clone();
                        handles.push(handle);
                        handles
                    })
                })
            })
    }

    /// Waits for the fiber and propagates its exit, success or failure.
    #[must_use]
    pub fn join_fiber(fiber: &Fiber<A, E>) -> Effect<A, E> {
        Effect::from_raw(Raw::Join(Rc::clone(&fiber.ctx)))
    }

    /// Waits for the fiber and yields its exit as a value; never propagates
    /// the failure.
    #[must_use]
    pub fn await_fiber(fiber: &Fiber<A, E>) -> Effect<FiberExit<A, E>, E> {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::AwaitFiber(Rc::clone(&fiber.ctx))),
            Rc::new(|exit: Erased| {
                Raw::Succeed(erase(typed_exit::<A, E>(unerase::<RawExit>(exit))))
            }),
        ))
    }

    /// Requests interruption of the fiber and waits for its exit.
    #[must_use]
    pub fn interrupt_fiber(fiber: &Fiber<A, E>) -> Effect<FiberExit<A, E>, E> {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::InterruptFiber(Rc::clone(&fiber.ctx))),
            Rc::new(|exit: Erased| {
                Raw::Succeed(erase(typed_exit::<A, E>(unerase::<RawExit>(exit))))
            }),
        ))
    }

    /// Snapshots the fiber's current status.
    #[must_use]
    pub fn fiber_status(fiber: &Fiber<A, E>) -> Effect<FiberStatus<A, E>, E> {
        Effect::from_raw(Raw::FlatMap(
            Rc::new(Raw::StatusOf(Rc::clone(&fiber.ctx))),
            Rc::new(|status: Erased| {
                Raw::Succeed(erase(typed_status::<A, E>(unerase::<RawStatus>(status))))
            }),
        ))
    }
}
