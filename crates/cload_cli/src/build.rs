//! `cload build` imports modules ahead of time, building stale ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::project::{project_loader, render_error};
use crate::{BuildArgs, GlobalArgs};

/// Runs the `cload build` command.
///
/// Every module is attempted even after a failure. Returns exit code 1 if
/// any module could not be resolved or built.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let loader = project_loader(global)?;
    let hit = Arc::new(AtomicBool::new(false));
    {
        let hit = Arc::clone(&hit);
        loader.add_observer(move |event| hit.store(event.cache_hit, Ordering::SeqCst));
    }

    let mut failures = 0;
    for name in &args.modules {
        let Some(unit) = loader.resolve(name) else {
            eprintln!("error: no foreign-source module named '{name}'");
            failures += 1;
            continue;
        };
        match loader.load(&unit) {
            Ok(module) => {
                if !global.quiet {
                    let status = if hit.load(Ordering::SeqCst) { "Cached" } else { "Built" };
                    eprintln!(
                        "{status:>9} {name} ({}, {} functions)",
                        unit.role,
                        module.functions().len()
                    );
                }
                if global.verbose {
                    if let Some(artifact) = module.origin() {
                        eprintln!("          {}", artifact.display());
                    }
                }
            }
            Err(e) => {
                eprintln!("error: {}", render_error(&e));
                failures += 1;
            }
        }
    }
    Ok(if failures == 0 { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn global(root: &std::path::Path) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(root.to_string_lossy().into_owned()),
            role: Some("debug".to_string()),
        }
    }

    fn args(modules: &[&str]) -> BuildArgs {
        BuildArgs {
            modules: modules.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn unresolved_module_exits_one() {
        let tmp = TempDir::new().unwrap();
        let code = run(&args(&["missing"]), &global(tmp.path())).unwrap();
        assert_eq!(code, 1);
        assert!(!tmp.path().join("__cload__").exists());
    }

    #[test]
    fn every_module_is_attempted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("plain.txt"), "").unwrap();
        let code = run(&args(&["plain", "pkg.missing", "a..b"]), &global(tmp.path())).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn bad_role_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut global = global(tmp.path());
        global.role = Some("fast".to_string());
        assert!(run(&args(&["m"]), &global).is_err());
    }
}
