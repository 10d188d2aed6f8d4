//! Error types for probing and invoking the toolchain.
//!
//! A failing compile or link is not an error here: it is a
//! [`BuildResult`](crate::BuildResult) with a failed status. These enums cover
//! the cases where no build could be attempted at all.

use std::path::PathBuf;

use cload_common::Role;

/// Errors raised while probing the build environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// No usable compiler driver was found.
    #[error("no usable C compiler found (tried: {})", tried.join(", "))]
    NoCompiler {
        /// Candidates that were tried, in order.
        tried: Vec<String>,
    },

    /// The compiler was found but did not report a version.
    #[error("compiler {path} did not run: {reason}")]
    Unusable {
        /// Resolved path of the compiler.
        path: PathBuf,
        /// Why running `--version` failed.
        reason: String,
    },

    /// Loadable extensions cannot be built on this platform.
    #[error("building loadable extensions is not supported on {os}")]
    UnsupportedPlatform {
        /// The target operating system.
        os: String,
    },
}

/// Errors raised while running a build.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// A file in the build workspace could not be written or read.
    #[error("build workspace I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl InvokeError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while configuring error injection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectionError {
    /// Injection was requested outside the test role.
    #[error("error injection is only available in the test role (active role: {role})")]
    WrongRole {
        /// The active role.
        role: Role,
    },

    /// The process-wide table was already installed.
    #[error("an injection table is already installed")]
    AlreadyInstalled,
}
