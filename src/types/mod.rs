//! Core types shared across the runtime.
//!
//! This module contains the fundamental value types used throughout the
//! runtime:
//!
//! - fiber identifiers ([`FiberId`])
//! - fiber exits and statuses ([`FiberExit`], [`FiberStatus`], [`ExitError`])
//! - the minimal result containers used at the runtime boundary
//!   ([`Either`], [`Exit`])

mod either;
mod exit;
mod id;

pub use either::Either;
pub use exit::{Exit, ExitError, FiberExit, FiberStatus};
pub use id::FiberId;
