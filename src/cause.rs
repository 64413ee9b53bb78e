//! The failure algebra.
//!
//! A [`Cause`] is an inductive record of *why* a fiber failed. Leaves
//! distinguish the three failure kinds — typed failures, defects, and
//! interrupts — and the two composite nodes preserve failure history:
//! `Then(left, right)` records that `right` happened after `left` (a
//! finalizer failing after the primary error), and `Both(left, right)`
//! records that the two happened concurrently (parallel aggregation).
//!
//! Preserving both composites is what lets finalizers fail *without hiding*
//! the primary error, and parallel operators report *all* causes. Adapters
//! that must collapse to a single error use [`Cause::squash`].
//!
//! # Composition Laws
//!
//! - `Empty` is the identity: `sequential(Empty, c) = sequential(c, Empty) = c`,
//!   and likewise for `both`.
//! - `Then` and `Both` preserve argument order; extractors produce the
//!   left-to-right preorder traversal of the relevant leaves.
//! - `map` rewrites only `Fail` leaves; defects, interrupts, and tree shape
//!   are preserved.

use crate::types::{ExitError, FiberId};
use core::fmt;
use std::any::Any;

/// An untyped defect: the analogue of an unchecked exception.
///
/// Defects arise from panics raised inside `sync` closures, async
/// registrations, or pure continuations. The panic payload is rendered to a
/// message string for transport and display.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Captures a caught panic payload as a defect.
    ///
    /// String payloads (the common case for `panic!("...")`) are preserved
    /// verbatim; anything else is rendered opaquely.
    #[must_use]
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast::<String>()
            .map(|s| *s)
            .or_else(|payload| payload.downcast::<&'static str>().map(|s| (*s).to_string()))
            .unwrap_or_else(|_| "panic of unknown type".to_string());
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// An inductive record of why a fiber failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// The identity element under both sequential and parallel composition.
    Empty,
    /// A typed, anticipated error.
    Fail(E),
    /// An untyped defect.
    Die(Defect),
    /// The fiber identified by the id was interrupted.
    Interrupt(FiberId),
    /// The right cause occurred after the left.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// The two causes occurred concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure leaf.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect leaf.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// An interrupt leaf for the given fiber.
    #[must_use]
    pub const fn interrupt(id: FiberId) -> Self {
        Self::Interrupt(id)
    }

    /// Sequential composition: `right` occurred after `left`.
    ///
    /// Empty sides are elided, so this never wraps a lone cause.
    #[must_use]
    pub fn sequential(left: Self, right: Self) -> Self {
        match (left, right) {
            (left, right) if right.is_empty() => left,
            (left, right) if left.is_empty() => right,
            (left, right) => Self::Then(Box::new(left), Box::new(right)),
        }
    }

    /// Parallel composition: `left` and `right` occurred concurrently.
    ///
    /// Empty sides are elided. Argument order is preserved.
    #[must_use]
    pub fn both(left: Self, right: Self) -> Self {
        match (left, right) {
            (left, right) if right.is_empty() => left,
            (left, right) if left.is_empty() => right,
            (left, right) => Self::Both(Box::new(left), Box::new(right)),
        }
    }

    /// Returns true if the cause contains no failure leaves at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => false,
            Self::Then(left, right) | Self::Both(left, right) => {
                left.is_empty() && right.is_empty()
            }
        }
    }

    /// Returns true if the cause contains at least one typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.find(&mut |leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Returns true if the cause contains at least one defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.find(&mut |leaf| matches!(leaf, Self::Die(_)))
    }

    /// Returns true if the cause contains at least one interrupt.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.find(&mut |leaf| matches!(leaf, Self::Interrupt(_)))
    }

    fn find(&self, pred: &mut impl FnMut(&Self) -> bool) -> bool {
        match self {
            Self::Then(left, right) | Self::Both(left, right) => {
                left.find(pred) || right.find(pred)
            }
            leaf => pred(leaf),
        }
    }

    /// Returns all typed errors in left-to-right preorder.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Fail(error) = leaf {
                out.push(error);
            }
        });
        out
    }

    /// Returns all defects in left-to-right preorder.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Die(defect) = leaf {
                out.push(defect);
            }
        });
        out
    }

    /// Returns the ids of all interrupted fibers in left-to-right preorder.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.visit(&mut |leaf| {
            if let Self::Interrupt(id) = leaf {
                out.push(*id);
            }
        });
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        match self {
            Self::Then(left, right) | Self::Both(left, right) => {
                left.visit(f);
                right.visit(f);
            }
            leaf => f(leaf),
        }
    }

    /// Returns the first typed error in preorder, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// Rewrites typed errors, preserving defects, interrupts, and shape.
    #[must_use]
    pub fn map<E2, F: Fn(E) -> E2>(self, f: F) -> Cause<E2> {
        self.map_ref(&f)
    }

    fn map_ref<E2, F: Fn(E) -> E2>(self, f: &F) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(error) => Cause::Fail(f(error)),
            Self::Die(defect) => Cause::Die(defect),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(left, right) => {
                Cause::Then(Box::new(left.map_ref(f)), Box::new(right.map_ref(f)))
            }
            Self::Both(left, right) => {
                Cause::Both(Box::new(left.map_ref(f)), Box::new(right.map_ref(f)))
            }
        }
    }

    /// Collapses the cause to a single error: the first typed failure, else
    /// the first defect, else the first interruptor, else `None`.
    #[must_use]
    pub fn squash(&self) -> Option<ExitError<E>>
    where
        E: Clone,
    {
        if let Some(error) = self.first_failure() {
            return Some(ExitError::Failed(error.clone()));
        }
        if let Some(defect) = self.defects().into_iter().next() {
            return Some(ExitError::Died(defect.clone()));
        }
        self.interruptors()
            .into_iter()
            .next()
            .map(ExitError::Interrupted)
    }

    /// Renders the cause with the bracketed prefix grammar, e.g.
    /// `Then(Fail("boom"), Die(cleanup))`.
    #[must_use]
    pub fn pretty_print(&self) -> String
    where
        E: fmt::Debug,
    {
        self.to_string()
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Fail(error) => write!(f, "Fail({error:?})"),
            Self::Die(defect) => write!(f, "Die({defect})"),
            Self::Interrupt(id) => write!(f, "Interrupt({id})"),
            Self::Then(left, right) => write!(f, "Then({left}, {right})"),
            Self::Both(left, right) => write!(f, "Both({left}, {right})"),
        }
    }
}
