//! `cload call` imports a module and calls one of its functions.

use cload_loader::Runtime;

use crate::project::project_loader;
use crate::{CallArgs, GlobalArgs};

/// Runs the `cload call` command, printing the returned value.
pub fn run(args: &CallArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let loader = project_loader(global)?;
    let runtime = Runtime::new();
    loader.install(&runtime);

    let module = runtime.import(&args.module)?;
    let value = module.call(&args.function)?;
    println!("{value}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cload_loader::ImportError;
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

    fn args(module: &str, function: &str) -> CallArgs {
        CallArgs {
            module: module.to_string(),
            function: function.to_string(),
        }
    }

    #[test]
    fn unresolved_module_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = run(&args("missing", "f"), &global(tmp.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::NotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn earlier_project_does_not_claim_later_imports() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("other.c"), "int x;\n").unwrap();

        // The first project claims `other`, whatever the build outcome.
        let _ = run(&args("other", "f"), &global(first.path()));

        let err = run(&args("other", "f"), &global(second.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::NotFound(_))
        ));
    }
}
