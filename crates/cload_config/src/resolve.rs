//! Settings resolution: merging the configuration file with the process
//! environment into the values the loader runs with.

use crate::error::ConfigError;
use crate::types::{LoaderConfig, Placement, ToolchainSection, DEFAULT_CACHE_DIR};
use cload_common::Role;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable selecting the compilation role.
pub const ROLE_ENV_VAR: &str = "CLOAD_ROLE";

/// Fully resolved loader settings.
///
/// Exactly one role is active. Search paths are absolute (resolved against
/// the directory that holds `cload.toml`).
#[derive(Debug, Clone)]
pub struct Settings {
    /// The active compilation role.
    pub role: Role,
    /// Option names per role, in declaration order.
    pub role_options: BTreeMap<Role, Vec<String>>,
    /// Directories scanned for foreign-source modules.
    pub search_paths: Vec<PathBuf>,
    /// Placement among sibling import handlers.
    pub placement: Placement,
    /// Cache directory name colocated with each source.
    pub cache_dir_name: String,
    /// Optional wall-clock limit per toolchain subprocess.
    pub timeout: Option<Duration>,
    /// Build attempts retained per transcript log.
    pub transcript_retain: usize,
    /// Age after which abandoned workspaces are purged.
    pub stale_workspace_after: Duration,
    /// Compiler selection and extra flags.
    pub toolchain: ToolchainSection,
}

impl Settings {
    /// Settings with defaults for everything but the role and search paths.
    pub fn new(role: Role, search_paths: Vec<PathBuf>) -> Self {
        Self {
            role,
            role_options: BTreeMap::new(),
            search_paths,
            placement: Placement::Append,
            cache_dir_name: DEFAULT_CACHE_DIR.to_string(),
            timeout: None,
            transcript_retain: 16,
            stale_workspace_after: Duration::from_secs(3600),
            toolchain: ToolchainSection::default(),
        }
    }

    /// Option names declared for the active role.
    pub fn active_options(&self) -> &[String] {
        self.role_options
            .get(&self.role)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Reads the role selection from the `CLOAD_ROLE` environment variable.
pub fn role_from_environment() -> Option<String> {
    std::env::var(ROLE_ENV_VAR).ok().filter(|v| !v.trim().is_empty())
}

/// Resolves settings from a parsed configuration.
///
/// `env_role` takes precedence over `loader.role`. A missing or unknown role
/// is an error: the loader cannot choose a compilation mode on its own.
pub fn resolve_settings(
    config: &LoaderConfig,
    base_dir: &Path,
    env_role: Option<&str>,
) -> Result<Settings, ConfigError> {
    let role_name = env_role
        .or(config.loader.role.as_deref())
        .ok_or(ConfigError::MissingRole)?;
    let role: Role = role_name.parse()?;

    let mut role_options = BTreeMap::new();
    for (name, options) in &config.role_options {
        role_options.insert(name.parse::<Role>()?, options.clone());
    }

    let search_paths = config
        .loader
        .search_paths
        .iter()
        .map(|p| absolutize(base_dir, p))
        .collect();

    let mut toolchain = config.toolchain.clone();
    toolchain.include_dirs = toolchain
        .include_dirs
        .iter()
        .map(|p| absolutize(base_dir, p).to_string_lossy().into_owned())
        .collect();
    toolchain.library_dirs = toolchain
        .library_dirs
        .iter()
        .map(|p| absolutize(base_dir, p).to_string_lossy().into_owned())
        .collect();

    Ok(Settings {
        role,
        role_options,
        search_paths,
        placement: config.loader.placement.clone(),
        cache_dir_name: config.loader.cache_dir.clone(),
        timeout: config.loader.timeout_secs.map(Duration::from_secs),
        transcript_retain: config.loader.transcript_retain,
        stale_workspace_after: Duration::from_secs(config.loader.stale_workspace_secs),
        toolchain,
    })
}

fn absolutize(base: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
