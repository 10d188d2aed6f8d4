//! Error types raised to importers.
//!
//! Every toolchain failure surfaces as [`ImportError::Tool`], whose source is
//! a [`ToolError`] carrying the phase, the exit status, and a reference to
//! the full transcript on disk. The transcript text itself is never part of
//! the message.

use std::fmt;
use std::path::PathBuf;

use cload_cache::{CacheError, TranscriptRef};
use cload_config::ConfigError;
use cload_toolchain::{InjectionError, InvokeError, Phase, ProbeError};

/// A compile or link step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    /// Module path of the unit.
    pub module: String,
    /// The failing phase.
    pub phase: Phase,
    /// Exit code of the tool, when it exited normally.
    pub exit_code: Option<i32>,
    /// The tool was killed after the timeout.
    pub timed_out: bool,
    /// The tool was killed because the build was cancelled.
    pub cancelled: bool,
    /// Where the full transcript of the attempt is stored.
    pub transcript: TranscriptRef,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of '{}' failed (", self.phase, self.module)?;
        if self.timed_out {
            f.write_str("timed out")?;
        } else if self.cancelled {
            f.write_str("cancelled")?;
        } else {
            match self.exit_code {
                Some(code) => write!(f, "exit status {code}")?,
                None => f.write_str("no exit status")?,
            }
        }
        write!(f, "); see {}", self.transcript)
    }
}

impl std::error::Error for ToolError {}

/// Errors raised while importing a module.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// No installed finder claimed the module.
    #[error("no module named '{0}'")]
    NotFound(String),

    /// The module is already being initialized by the importing thread.
    #[error("circular import of '{0}'")]
    Circular(String),

    /// The toolchain failed to build the module.
    #[error("failed to build extension module '{module}'")]
    Tool {
        /// Module path of the unit.
        module: String,
        /// The failing step.
        #[source]
        source: ToolError,
    },

    /// No usable toolchain exists and no cached artifact can stand in.
    #[error("cannot build extension module '{module}'")]
    Environment {
        /// Module path of the unit.
        module: String,
        /// Why probing failed.
        #[source]
        source: ProbeError,
    },

    /// Configuration or sidecar error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error injection was configured outside the test role.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// The cache directory of the module could not be used.
    #[error("cache error for '{module}'")]
    Cache {
        /// Module path of the unit.
        module: String,
        /// The underlying cache error.
        #[source]
        source: CacheError,
    },

    /// The build workspace could not be prepared.
    #[error("cannot prepare build of '{module}'")]
    Workspace {
        /// Module path of the unit.
        module: String,
        /// The underlying error.
        #[source]
        source: InvokeError,
    },

    /// The artifact could not be loaded by the dynamic loader.
    #[error("cannot load {path} for '{module}'")]
    Load {
        /// Module path of the unit.
        module: String,
        /// The artifact path.
        path: PathBuf,
        /// The dynamic loader's error.
        #[source]
        source: libloading::Error,
    },

    /// The artifact loaded but its module descriptor is unusable.
    #[error("invalid extension module '{module}': {reason}")]
    Init {
        /// Module path of the unit.
        module: String,
        /// What is wrong with the descriptor.
        reason: String,
    },
}

impl ImportError {
    /// The toolchain failure behind this error, if any.
    pub fn tool_error(&self) -> Option<&ToolError> {
        match self {
            ImportError::Tool { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised when calling a module function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The module exports no function with that name.
    #[error("module '{module}' has no function '{function}'")]
    NoSuchFunction {
        /// The module.
        module: String,
        /// The requested function.
        function: String,
    },

    /// The function returned a value the host cannot represent.
    #[error("'{module}.{function}' returned an invalid value: {reason}")]
    BadValue {
        /// The module.
        module: String,
        /// The function.
        function: String,
        /// What is wrong with the value.
        reason: String,
    },
}
