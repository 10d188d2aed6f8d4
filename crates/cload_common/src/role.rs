//! Compilation roles.
//!
//! A role selects how every foreign-source unit in the process is compiled.
//! Exactly one role is active per process; it is threaded explicitly into
//! command construction and into cache identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of compilation roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unoptimized build exposing test-only hooks such as error injection.
    Test,
    /// Unoptimized build with debug information.
    Debug,
    /// Optimized build for normal use.
    Optimized,
    /// Build instrumented for inspection (frame pointers, no inlining).
    Inspect,
    /// Minimal build used while the toolchain itself is being brought up.
    Bootstrap,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 5] = [
        Role::Test,
        Role::Debug,
        Role::Optimized,
        Role::Inspect,
        Role::Bootstrap,
    ];

    /// The canonical lowercase name used in directory names and defines.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Test => "test",
            Role::Debug => "debug",
            Role::Optimized => "optimized",
            Role::Inspect => "inspect",
            Role::Bootstrap => "bootstrap",
        }
    }

    /// The name of the conditional compilation switch for this role,
    /// e.g. `CLOAD_ROLE_TEST`.
    pub fn switch(self) -> String {
        format!("CLOAD_ROLE_{}", self.as_str().to_ascii_uppercase())
    }

    /// Returns `true` for the only role allowed to carry injection hooks.
    pub fn is_test(self) -> bool {
        self == Role::Test
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown compilation role '{0}' (expected one of: test, debug, optimized, inspect, bootstrap)")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Role::Test),
            "debug" => Ok(Role::Debug),
            "optimized" | "factor" => Ok(Role::Optimized),
            "inspect" | "instrumented" => Ok(Role::Inspect),
            "bootstrap" => Ok(Role::Bootstrap),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}
