//! Tracing compatibility layer for structured logging.
//!
//! This module provides a unified logging interface that works whether or
//! not the `tracing-integration` feature is enabled:
//!
//! - **With the feature**: re-exports the level macros from the `tracing`
//!   crate for full structured output.
//! - **Without it**: no-op macros that compile to nothing, so the runtime's
//!   hot paths carry zero logging overhead by default.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fiberio::tracing_compat::{debug, trace};
//!
//! debug!(fiber = %id, "fiber spawned");
//! trace!(deadline_ms = deadline, "timer armed");
//! ```
//!
//! # Feature Flag
//!
//! ```toml
//! fiberio = { version = "0.1", features = ["tracing-integration"] }
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

// When tracing is disabled, provide no-op macros.
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
