//! Fiber exit and status types.
//!
//! A [`FiberExit`] is the terminal result of running a fiber: either a
//! success value or a [`Cause`](crate::cause::Cause) explaining the failure
//! with full fidelity. [`FiberStatus`] is the observable lifecycle snapshot
//! (`Running → Suspended → Running* → Done`, with `Done` terminal).
//!
//! At the runtime boundary, causes are often *squashed* to a single error:
//! [`ExitError`] is that flattened view, and [`Exit`] is the minimal
//! success/failure container the façade reports it in.

use crate::cause::{Cause, Defect};
use crate::types::FiberId;
use core::fmt;
use thiserror::Error;

/// The terminal result of a fiber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberExit<A, E> {
    /// The fiber completed with a value.
    Success(A),
    /// The fiber failed; the cause records why, preserving sequential and
    /// parallel failure structure.
    Failure(Cause<E>),
}

impl<A, E> FiberExit<A, E> {
    /// Returns true if this exit is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this exit is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the exit is a failure whose cause contains an
    /// interrupt.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(cause) if cause.is_interrupted())
    }

    /// Returns the success value, if any.
    pub fn success(self) -> Option<A> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure cause, if any.
    pub fn cause(self) -> Option<Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> FiberExit<B, E> {
        match self {
            Self::Success(value) => FiberExit::Success(f(value)),
            Self::Failure(cause) => FiberExit::Failure(cause),
        }
    }

    /// Maps typed errors inside the failure cause, leaving defects and
    /// interrupts untouched.
    pub fn map_error<E2, F: Fn(E) -> E2>(self, f: F) -> FiberExit<A, E2> {
        match self {
            Self::Success(value) => FiberExit::Success(value),
            Self::Failure(cause) => FiberExit::Failure(cause.map(f)),
        }
    }

    /// Collapses both sides into a single value.
    pub fn fold<B>(self, on_failure: impl FnOnce(Cause<E>) -> B, on_success: impl FnOnce(A) -> B) -> B {
        match self {
            Self::Success(value) => on_success(value),
            Self::Failure(cause) => on_failure(cause),
        }
    }

    /// Converts this exit to a standard `Result` carrying the full cause.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(cause) => Err(cause),
        }
    }
}

/// A snapshot of a fiber's lifecycle state.
///
/// `Done` is terminal: once observed, the status never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberStatus<A, E> {
    /// The interpreter currently holds the fiber's frame.
    Running,
    /// The fiber is waiting at an asynchronous boundary (async registration,
    /// sleep, or a wait on another fiber).
    Suspended,
    /// The fiber has completed with the recorded exit.
    Done(FiberExit<A, E>),
}

impl<A, E> FiberStatus<A, E> {
    /// Returns true if the fiber has reached its terminal state.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns true if the fiber is suspended at an async boundary.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }

    /// Returns the exit, if the fiber is done.
    pub fn exit(self) -> Option<FiberExit<A, E>> {
        match self {
            Self::Done(exit) => Some(exit),
            _ => None,
        }
    }
}

/// A failure cause squashed to a single error.
///
/// Squashing picks the first typed failure if the cause contains one, else
/// the first defect, else the first interruptor. This is the shape the
/// runtime façade reports when the caller asked for one error rather than
/// the full [`Cause`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitError<E> {
    /// A typed, anticipated error.
    #[error("failed: {0:?}")]
    Failed(E),
    /// An untyped defect (a panic raised inside an effect).
    #[error("died: {0}")]
    Died(Defect),
    /// The fiber was interrupted.
    #[error("interrupted by {0}")]
    Interrupted(FiberId),
}

impl<E> ExitError<E> {
    /// Returns true if this is a typed failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if this is a defect.
    #[must_use]
    pub const fn is_died(&self) -> bool {
        matches!(self, Self::Died(_))
    }

    /// Returns true if this is an interrupt.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Returns the typed error, if any.
    pub fn failed(self) -> Option<E> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Minimal success/failure container used at the runtime boundary.
///
/// Unlike [`FiberExit`], the failure side carries a flattened error rather
/// than a cause tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit<E, A> {
    /// The computation failed with the flattened error.
    Failure(E),
    /// The computation succeeded.
    Success(A),
}

impl<E, A> Exit<E, A> {
    /// Returns true if this is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Collapses both sides into a single value.
    pub fn fold<B>(self, on_failure: impl FnOnce(E) -> B, on_success: impl FnOnce(A) -> B) -> B {
        match self {
            Self::Failure(error) => on_failure(error),
            Self::Success(value) => on_success(value),
        }
    }

    /// Converts to a standard `Result`.
    pub fn into_result(self) -> Result<A, E> {
        match self {
            Self::Failure(error) => Err(error),
            Self::Success(value) => Ok(value),
        }
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<A: fmt::Display, E: fmt::Display> fmt::Display for Exit<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure(error) => write!(f, "Failure({error})"),
            Self::Success(value) => write!(f, "Success({value})"),
        }
    }
}
