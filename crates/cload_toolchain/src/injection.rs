//! Role-gated error injection.
//!
//! An [`InjectionTable`] maps `(function, operation)` pairs to the errno
//! value the operation should fail with. The toolchain consults it for the
//! `("build", "compile")` and `("build", "link")` steps, and extensions built
//! in the test role consult the process-wide table through
//! [`injection_trampoline`] from their `CLOAD_SYSCALL` wrappers.
//!
//! The process-wide table is installed at most once, only in the test role,
//! and is immutable afterwards.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, CStr};
use std::sync::OnceLock;

use cload_common::Role;

use crate::error::InjectionError;

/// Function name under which the invoker looks up its own steps.
pub const BUILD_FUNCTION: &str = "build";

/// Forced failures keyed by `(function, operation)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InjectionTable {
    entries: HashMap<(String, String), i32>,
}

impl InjectionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, returning the table.
    pub fn with(mut self, function: &str, operation: &str, errno: i32) -> Self {
        self.insert(function, operation, errno);
        self
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, function: &str, operation: &str, errno: i32) {
        self.entries
            .insert((function.to_string(), operation.to_string()), errno);
    }

    /// The errno forced for `(function, operation)`, if any.
    pub fn get(&self, function: &str, operation: &str) -> Option<i32> {
        self.entries
            .get(&(function.to_string(), operation.to_string()))
            .copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rejects injection outside the test role.
pub fn check_role(role: Role) -> Result<(), InjectionError> {
    if role.is_test() {
        Ok(())
    } else {
        Err(InjectionError::WrongRole { role })
    }
}

static INSTALLED: OnceLock<InjectionTable> = OnceLock::new();

/// Installs the process-wide table. Fails outside the test role and when a
/// table was already installed.
pub fn install(role: Role, table: InjectionTable) -> Result<&'static InjectionTable, InjectionError> {
    check_role(role)?;
    let mut installed = false;
    let table = INSTALLED.get_or_init(|| {
        installed = true;
        table
    });
    if !installed {
        return Err(InjectionError::AlreadyInstalled);
    }
    log::info!("installed error injection table with {} entries", table.len());
    Ok(table)
}

/// The process-wide table, when one was installed.
pub fn active() -> Option<&'static InjectionTable> {
    INSTALLED.get()
}

/// Injector handed to test-role extensions through `cload_set_injector`.
///
/// Returns the errno to fail with, or `-1` to perform the real call.
///
/// # Safety
///
/// `function` and `operation` must be null or point to NUL-terminated
/// strings valid for the duration of the call.
pub unsafe extern "C" fn injection_trampoline(
    function: *const c_char,
    operation: *const c_char,
) -> c_int {
    if function.is_null() || operation.is_null() {
        return -1;
    }
    let Some(table) = active() else {
        return -1;
    };
    // SAFETY: both pointers are non-null and NUL-terminated per the contract.
    let (function, operation) = unsafe { (CStr::from_ptr(function), CStr::from_ptr(operation)) };
    match (function.to_str(), operation.to_str()) {
        (Ok(f), Ok(o)) => table.get(f, o).unwrap_or(-1),
        _ => -1,
    }
}
