//! Shared helpers for CLI commands: locating the project, loading its
//! configuration, and creating a loader from it.

use std::path::{Path, PathBuf};

use cload_config::{load_config, resolve_settings, role_from_environment, LoaderConfig, Settings, CONFIG_FILE};
use cload_loader::CLoader;

use crate::GlobalArgs;

/// Walks up from `start` looking for the nearest directory containing
/// `cload.toml`. Without one, `start` itself is the project root.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `cload.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match global.config {
        Some(ref config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                Ok(p.parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => Ok(find_project_root(&std::env::current_dir()?)),
    }
}

/// Loads `cload.toml` from `root`, or the defaults when there is none.
pub fn load_project_config(root: &Path) -> Result<LoaderConfig, Box<dyn std::error::Error>> {
    if root.join(CONFIG_FILE).is_file() {
        Ok(load_config(root)?)
    } else {
        Ok(LoaderConfig::default())
    }
}

/// Resolves loader settings for the project at `root`.
///
/// `--role` takes precedence over `CLOAD_ROLE`, which takes precedence over
/// `loader.role`. Without configured search paths the project root is
/// searched.
pub fn load_settings(root: &Path, global: &GlobalArgs) -> Result<Settings, Box<dyn std::error::Error>> {
    let config = load_project_config(root)?;
    let role = global.role.clone().or_else(role_from_environment);
    let mut settings = resolve_settings(&config, root, role.as_deref())?;
    if settings.search_paths.is_empty() {
        settings.search_paths.push(root.to_path_buf());
    }
    Ok(settings)
}

/// Creates a loader for the project selected by the global args.
pub fn project_loader(global: &GlobalArgs) -> Result<CLoader, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let settings = load_settings(&root, global)?;
    log::debug!(
        "project {} (role {}, {} search paths)",
        root.display(),
        settings.role,
        settings.search_paths.len()
    );
    Ok(CLoader::builder(settings).build()?)
}

/// Renders `err` followed by its chain of sources.
pub fn render_error(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
