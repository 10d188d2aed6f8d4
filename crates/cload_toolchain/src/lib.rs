//! Toolchain probing and invocation for compiled extensions.
//!
//! This crate detects the compiler drivers and platform conventions of the
//! running process, constructs compile and link command lines carrying the
//! role and module macro environment, runs them with captured output, and
//! provides the role-gated error-injection seam used by tests.

#![warn(missing_docs)]

pub mod error;
pub mod flags;
pub mod header;
pub mod injection;
pub mod invoker;
pub mod probe;
pub mod run;

pub use error::{InjectionError, InvokeError, ProbeError};
pub use flags::{macro_environment, role_cflags, Define};
pub use injection::InjectionTable;
pub use invoker::{BuildRequest, BuildResult, BuildStatus, Invoker, Phase};
pub use probe::{probe, Compiler, Environment, Platform, Prober};
pub use run::{run_captured, CommandLine, RunLimits, RunOutcome, Termination};
