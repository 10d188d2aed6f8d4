//! Integration test for error injection inside compiled extensions.
//!
//! The process-wide injection table can be installed once, so this suite
//! lives in its own test binary.

mod common;

use cload_common::Role;
use cload_loader::{Runtime, Value};
use cload_toolchain::{injection, InjectionTable};
use common::{loader, project, toolchain_available};

const EACCES: i32 = 13;

#[test]
fn injected_syscall_failure_reaches_test_role_only() {
    if !toolchain_available() {
        return;
    }
    let table = InjectionTable::new().with("open_devnull", "open", EACCES);
    assert!(injection::install(Role::Optimized, table.clone()).is_err());
    injection::install(Role::Test, table).unwrap();

    let dir = project(&["syscalls.c"]);
    let test = loader(dir.path(), Role::Test);
    assert!(test.install(Runtime::global()));
    let module = Runtime::global().import("syscalls").unwrap();
    assert_eq!(module.call("open_devnull").unwrap(), Value::Int(-i64::from(EACCES)));

    // Outside the test role the wrapper is a plain call.
    let optimized = loader(dir.path(), Role::Optimized);
    let module = optimized
        .load(&optimized.resolve("syscalls").unwrap())
        .unwrap();
    assert_eq!(module.call("open_devnull").unwrap(), Value::Int(0));
}
