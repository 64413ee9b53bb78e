//! Fiberio: a typed functional effect runtime for Rust.
//!
//! # Overview
//!
//! Fiberio separates *describing* a computation from *running* it. An
//! [`Effect<A, E>`](effect::Effect) is an immutable value denoting a
//! computation that needs an environment, may fail with a typed error `E`,
//! and on success produces an `A`. Nothing happens until a
//! [`Runtime`](runtime::Runtime) hands the description to the interpreter,
//! which executes it on cooperative fibers.
//!
//! # Core Guarantees
//!
//! - **Laziness**: composing effects allocates a description tree; no user
//!   code runs before the runtime is asked to.
//! - **Structured failure**: every failure is a [`Cause`](cause::Cause) tree
//!   that preserves both sequential (`Then`) and parallel (`Both`) failure
//!   history, and distinguishes typed errors, defects, and interrupts.
//! - **Cancel-correctness**: interruption is cooperative and observable.
//!   Finalizers run with interruption disabled; a pending interrupt latches
//!   and re-fires once the protected region completes.
//! - **Single-threaded scheduling**: at most one fiber executes at any
//!   instant. Fibers interleave only at suspension points (async
//!   registration, sleeps, fiber waits), so intermediate state is never
//!   observed mid-reduction.
//! - **Deterministic testing**: a virtual-clock runtime advances time to the
//!   next deadline instead of sleeping, so timing scenarios are exact.
//!
//! # Module Structure
//!
//! - [`cause`]: the failure algebra (`Empty`/`Fail`/`Die`/`Interrupt`/`Then`/`Both`)
//! - [`types`]: identifiers and result containers (`FiberId`, `FiberExit`, `Either`, `Exit`)
//! - [`env`]: the service registry (`Tag`, `Env`)
//! - [`effect`]: the effect algebra and its operator surface
//! - [`fiber`]: fiber handles and per-fiber state
//! - [`runtime`]: the interpreter, scheduler, and run-and-observe façade
//! - [`tracing_compat`]: feature-gated structured logging shim
//! - [`test_utils`]: shared test logging and assertion helpers
//!
//! # Example
//!
//! ```
//! use fiberio::effect::Effect;
//! use fiberio::runtime::Runtime;
//!
//! let program = Effect::<i32, String>::succeed(1)
//!     .map(|x| x + 1)
//!     .flat_map(|x| Effect::succeed(x * 2));
//!
//! let runtime = Runtime::default();
//! assert_eq!(runtime.unsafe_run(program), 4);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod cause;
pub mod effect;
pub mod env;
pub mod fiber;
pub mod runtime;
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

// Re-exports for convenient access to core types
pub use cause::{Cause, Defect};
pub use effect::{AsyncHandle, Effect};
pub use env::{Env, Tag};
pub use fiber::Fiber;
pub use runtime::Runtime;
pub use types::{Either, Exit, ExitError, FiberExit, FiberId, FiberStatus};
