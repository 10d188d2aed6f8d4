//! `cload clear` removes cache directories.

use std::path::PathBuf;

use cload_cache::clear_tree;

use crate::project::{load_project_config, resolve_project_root};
use crate::{ClearArgs, GlobalArgs};

/// Runs the `cload clear` command.
///
/// Clears the given trees, or the project root when none are given.
pub fn run(args: &ClearArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = load_project_config(&root)?;
    let roots: Vec<PathBuf> = if args.dirs.is_empty() {
        vec![root]
    } else {
        args.dirs.clone()
    };

    let removed = clear_tree(&roots, &config.loader.cache_dir)?;
    if !global.quiet {
        for path in &removed {
            eprintln!("  Removed {}", path.display());
        }
        eprintln!(
            "Cleared {} cache director{}",
            removed.len(),
            if removed.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(0)
}
