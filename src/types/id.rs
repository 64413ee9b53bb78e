//! Fiber identifier type.
//!
//! Fiber ids are process-unique: they are allocated from a global monotonic
//! counter, so two fibers never share a sequence number within one process.
//! Each id also records the wall-clock time at which the fiber was created;
//! the timestamp is informational and takes no part in identity.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a fiber.
///
/// Ordering and equality consider the sequence number first; the start
/// timestamp only breaks ties that cannot occur in practice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId {
    seq: u64,
    started_at: u64,
}

impl FiberId {
    /// Allocates the next process-unique fiber id, stamped with the current
    /// wall-clock time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn next() -> Self {
        let seq = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { seq, started_at }
    }

    /// Returns the process-unique sequence number.
    #[must_use]
    pub const fn seq(self) -> u64 {
        self.seq
    }

    /// Returns the creation time in milliseconds since the Unix epoch.
    ///
    /// Informational only; never used for identity.
    #[must_use]
    pub const fn started_at(self) -> u64 {
        self.started_at
    }

    /// Creates a fiber id with explicit fields, for tests that need stable
    /// identifiers.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(seq: u64, started_at: u64) -> Self {
        Self { seq, started_at }
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({}@{})", self.seq, self.started_at)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber#{}", self.seq)
    }
}
