//! Test utilities for Fiberio.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Exit assertion macros
//!
//! # Example
//! ```
//! use fiberio::test_utils::init_test_logging;
//!
//! fn my_test() {
//!     init_test_logging();
//!     fiberio::test_phase!("my_test");
//!     // test body
//!     fiberio::test_complete!("my_test");
//! }
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a fiber exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::FiberExit::Success(value) => assert_eq!(value, $expected),
            other => unreachable!(
                "expected FiberExit::Success({:?}), got {:?}",
                $expected, other
            ),
        }
    };
}

/// Assert that a fiber exit is a failure whose cause contains an interrupt.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            $crate::types::FiberExit::Failure(cause) => {
                assert!(cause.is_interrupted(), "expected an interrupt cause, got {cause}");
            }
            other => unreachable!("expected an interrupted exit, got {:?}", other),
        }
    };
}

/// Assert that a fiber exit is a failure with at least one typed error.
#[macro_export]
macro_rules! assert_exit_failed {
    ($exit:expr) => {
        match $exit {
            $crate::types::FiberExit::Failure(cause) => {
                assert!(cause.is_failure(), "expected a typed failure, got {cause}");
            }
            other => unreachable!("expected a failed exit, got {:?}", other),
        }
    };
}
