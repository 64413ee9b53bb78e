//! The runtime façade.
//!
//! A [`Runtime`] binds a service registry and a clock choice to the
//! interpreter and exposes the run-and-observe entry points. Each entry
//! point interprets the same fiber exit at a different fidelity:
//!
//! | entry point | success | failure |
//! |---|---|---|
//! | [`unsafe_run`](Runtime::unsafe_run) | value | panics with the pretty-printed cause |
//! | [`safe_run`](Runtime::safe_run) | `Ok(value)` | `Err(ExitError)` (squashed) |
//! | [`safe_run_either`](Runtime::safe_run_either) | `Right(value)` | `Left(ExitError)` |
//! | [`safe_run_exit`](Runtime::safe_run_exit) | `Success(value)` | `Failure(ExitError)` |
//! | [`safe_run_cause`](Runtime::safe_run_cause) | `Ok(value)` | `Err(Cause)` (full fidelity) |
//!
//! Squashing picks the first typed failure, else the first defect, else the
//! first interruptor (see [`Cause::squash`]).
//!
//! Runtimes are values: [`provide_service`](Runtime::provide_service)
//! returns a new runtime with the binding added, leaving the receiver
//! unaffected.

pub(crate) mod clock;
pub(crate) mod interpreter;
pub(crate) mod scheduler;

use crate::cause::{Cause, Defect};
use crate::effect::raw::unerase;
use crate::effect::Effect;
use crate::env::{Env, Tag};
use crate::types::{Either, Exit, ExitError};
use clock::Clock;
use core::fmt::Debug;
use scheduler::Executor;

/// Binds services and a clock to the interpreter.
///
/// The default runtime holds an empty registry and measures real time. The
/// [`lab`](Runtime::lab) runtime uses virtual time: the scheduler jumps the
/// clock to the next timer deadline instead of parking the thread, so
/// time-based tests run instantly and deterministically.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    env: Env,
    virtual_clock: bool,
}

impl Runtime {
    /// A runtime with an empty registry and the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A deterministic runtime with an empty registry and virtual time.
    #[must_use]
    pub fn lab() -> Self {
        Self {
            env: Env::empty(),
            virtual_clock: true,
        }
    }

    /// A wall-clock runtime over the given registry.
    #[must_use]
    pub fn with_services(env: Env) -> Self {
        Self {
            env,
            virtual_clock: false,
        }
    }

    /// Returns the bound registry.
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Returns a new runtime with the service bound under the tag.
    ///
    /// The receiver is unaffected.
    #[must_use]
    pub fn provide_service<S: 'static>(&self, tag: &Tag<S>, service: S) -> Self {
        Self {
            env: self.env.with_service(tag, service),
            virtual_clock: self.virtual_clock,
        }
    }

    fn clock(&self) -> Clock {
        if self.virtual_clock {
            Clock::virtual_clock()
        } else {
            Clock::monotonic()
        }
    }

    /// Runs the effect and reports the failure, if any, as the full cause
    /// tree.
    ///
    /// This is the highest-fidelity observation: defect and interrupt
    /// structure survives intact, which the squashing entry points discard.
    pub fn safe_run_cause<A, E>(&self, effect: Effect<A, E>) -> Result<A, Cause<E>>
    where
        A: Clone + 'static,
        E: Clone + 'static,
    {
        let mut executor = Executor::new(self.env.clone(), self.clock());
        executor
            .run(effect.into_raw())
            .map(unerase::<A>)
            .map_error(unerase::<E>)
            .into_result()
    }

    /// Runs the effect and yields the value, panicking on any failure with
    /// the pretty-printed cause.
    pub fn unsafe_run<A, E>(&self, effect: Effect<A, E>) -> A
    where
        A: Clone + 'static,
        E: Clone + Debug + 'static,
    {
        match self.safe_run_cause(effect) {
            Ok(value) => value,
            Err(cause) => panic!("effect failed: {}", cause.pretty_print()),
        }
    }

    /// Runs the effect, squashing any failure to a single [`ExitError`].
    ///
    /// The union-shaped observation for simple call sites.
    pub fn safe_run<A, E>(&self, effect: Effect<A, E>) -> Result<A, ExitError<E>>
    where
        A: Clone + 'static,
        E: Clone + 'static,
    {
        self.safe_run_cause(effect).map_err(squash_cause)
    }

    /// Runs the effect and reports the squashed observation as an
    /// [`Either`]: `Left` on failure, `Right` on success.
    pub fn safe_run_either<A, E>(&self, effect: Effect<A, E>) -> Either<ExitError<E>, A>
    where
        A: Clone + 'static,
        E: Clone + 'static,
    {
        Either::from(self.safe_run(effect))
    }

    /// Runs the effect and reports the squashed observation as an
    /// [`Exit`].
    pub fn safe_run_exit<A, E>(&self, effect: Effect<A, E>) -> Exit<ExitError<E>, A>
    where
        A: Clone + 'static,
        E: Clone + 'static,
    {
        Exit::from(self.safe_run(effect))
    }
}

fn squash_cause<E: Clone>(cause: Cause<E>) -> ExitError<E> {
    cause.squash().unwrap_or_else(|| {
        // An empty failure cause cannot be produced by the interpreter.
        ExitError::Died(Defect::new("fiber failed with an empty cause"))
    })
}
