//! Integration tests running the `cload` binary as separate processes.
//!
//! Each invocation starts with empty in-process state, so anything reused
//! between runs must come from the on-disk cache. Tests that build return
//! early when no compiler is installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use cload_config::ToolchainSection;
use tempfile::TempDir;

fn cload_binary() -> &'static str {
    env!("CARGO_BIN_EXE_cload")
}

fn toolchain_available() -> bool {
    match cload_toolchain::probe(&ToolchainSection::default()) {
        Ok(_) => true,
        Err(e) => {
            eprintln!("skipping: {e}");
            false
        }
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../cload_loader/tests/fixtures")
        .join(name)
}

fn project_with_return_true() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(fixture("return_true.c"), dir.path().join("return_true.c")).unwrap();
    dir
}

fn cload(project: &Path, args: &[&str]) -> Output {
    Command::new(cload_binary())
        .arg("--config")
        .arg(project)
        .args(["--role", "debug"])
        .args(args)
        .env_remove("CLOAD_ROLE")
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn {}: {e}", cload_binary()))
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ===========================================================================
// Category A: Cache reuse across processes
// ===========================================================================

#[test]
fn second_process_reuses_cached_build() {
    if !toolchain_available() {
        return;
    }
    let dir = project_with_return_true();

    let first = cload(dir.path(), &["build", "return_true"]);
    assert_eq!(first.status.code(), Some(0), "stderr: {}", stderr(&first));
    assert!(stderr(&first).contains("Built return_true"));

    let second = cload(dir.path(), &["build", "return_true"]);
    assert_eq!(second.status.code(), Some(0), "stderr: {}", stderr(&second));
    assert!(
        stderr(&second).contains("Cached return_true"),
        "expected a cache hit, stderr: {}",
        stderr(&second)
    );
}

#[test]
fn call_in_new_process_uses_cached_artifact() {
    if !toolchain_available() {
        return;
    }
    let dir = project_with_return_true();
    let build = cload(dir.path(), &["build", "return_true"]);
    assert_eq!(build.status.code(), Some(0), "stderr: {}", stderr(&build));

    let call = cload(dir.path(), &["call", "return_true", "return_true"]);
    assert_eq!(call.status.code(), Some(0), "stderr: {}", stderr(&call));
    assert_eq!(String::from_utf8_lossy(&call.stdout).trim(), "True");
}

// ===========================================================================
// Category B: Inspection
// ===========================================================================

#[test]
fn log_prints_transcript_of_failed_build() {
    if !toolchain_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    fs::copy(fixture("syntax_error.c"), dir.path().join("syntax_error.c")).unwrap();

    let build = cload(dir.path(), &["build", "syntax_error"]);
    assert_eq!(build.status.code(), Some(1));
    assert!(stderr(&build).contains("compile of 'syntax_error' failed"));

    let log = cload(dir.path(), &["log", "syntax_error"]);
    assert_eq!(log.status.code(), Some(0), "stderr: {}", stderr(&log));
    let text = String::from_utf8_lossy(&log.stdout);
    assert!(text.starts_with("$ "));
    assert!(text.contains("syntax_error.c"));
    assert!(text.contains("[compile: "));
}

#[test]
fn log_of_unbuilt_module_exits_one() {
    let dir = project_with_return_true();
    let log = cload(dir.path(), &["log", "return_true"]);
    assert_eq!(log.status.code(), Some(1));
    assert!(log.stdout.is_empty());
    assert!(!dir.path().join("__cload__").exists());
}
