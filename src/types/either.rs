//! A value that is one of two alternatives.
//!
//! `Either<L, R>` is the minimal sum type used at the effect boundary: the
//! `absolve`/`from_either` operators move an `Either` between the value and
//! error channels, and `safe_run_either` reports results in it. By
//! convention `Left` carries the failure and `Right` the success.

use core::fmt;

/// A value that is either `Left(L)` or `Right(R)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    /// The left alternative, conventionally the failure.
    Left(L),
    /// The right alternative, conventionally the success.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Returns true if this is a `Left`.
    #[must_use]
    pub const fn is_left(&self) -> bool {
        matches!(self, Self::Left(_))
    }

    /// Returns true if this is a `Right`.
    #[must_use]
    pub const fn is_right(&self) -> bool {
        matches!(self, Self::Right(_))
    }

    /// Collapses both alternatives into a single value.
    pub fn fold<B>(self, on_left: impl FnOnce(L) -> B, on_right: impl FnOnce(R) -> B) -> B {
        match self {
            Self::Left(left) => on_left(left),
            Self::Right(right) => on_right(right),
        }
    }

    /// Maps the left alternative.
    pub fn map_left<L2>(self, f: impl FnOnce(L) -> L2) -> Either<L2, R> {
        match self {
            Self::Left(left) => Either::Left(f(left)),
            Self::Right(right) => Either::Right(right),
        }
    }

    /// Maps the right alternative.
    pub fn map_right<R2>(self, f: impl FnOnce(R) -> R2) -> Either<L, R2> {
        match self {
            Self::Left(left) => Either::Left(left),
            Self::Right(right) => Either::Right(f(right)),
        }
    }

    /// Returns the left value, if any.
    pub fn left(self) -> Option<L> {
        match self {
            Self::Left(left) => Some(left),
            Self::Right(_) => None,
        }
    }

    /// Returns the right value, if any.
    pub fn right(self) -> Option<R> {
        match self {
            Self::Left(_) => None,
            Self::Right(right) => Some(right),
        }
    }

    /// Converts to a `Result`, treating `Right` as `Ok`.
    pub fn into_result(self) -> Result<R, L> {
        match self {
            Self::Left(left) => Err(left),
            Self::Right(right) => Ok(right),
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        match result {
            Ok(right) => Self::Right(right),
            Err(left) => Self::Left(left),
        }
    }
}

impl<L: fmt::Display, R: fmt::Display> fmt::Display for Either<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left(left) => write!(f, "Left({left})"),
            Self::Right(right) => write!(f, "Right({right})"),
        }
    }
}
