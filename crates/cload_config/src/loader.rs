//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{LoaderConfig, UnitSidecar, CONFIG_FILE};
use cload_common::Role;
use std::path::Path;

/// Loads and validates a `cload.toml` configuration from a directory.
///
/// Reads `<dir>/cload.toml`, parses it, and validates its values.
pub fn load_config(dir: &Path) -> Result<LoaderConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `cload.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<LoaderConfig, ConfigError> {
    let config: LoaderConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads a per-unit sidecar file.
pub fn load_sidecar(path: &Path) -> Result<UnitSidecar, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_sidecar_from_str(&content)
}

/// Parses a per-unit sidecar from a string.
pub fn load_sidecar_from_str(content: &str) -> Result<UnitSidecar, ConfigError> {
    let sidecar: UnitSidecar =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    for name in sidecar.compile.defines.keys() {
        if !is_identifier(name) {
            return Err(ConfigError::ValidationError(format!(
                "define '{name}' is not a valid identifier"
            )));
        }
    }
    Ok(sidecar)
}

/// Validates that configuration values are consistent.
fn validate_config(config: &LoaderConfig) -> Result<(), ConfigError> {
    let cache_dir = &config.loader.cache_dir;
    if cache_dir.is_empty() || cache_dir.contains(['/', '\\']) || cache_dir == ".." {
        return Err(ConfigError::ValidationError(format!(
            "loader.cache_dir must be a plain directory name, got '{cache_dir}'"
        )));
    }
    if config.loader.transcript_retain == 0 {
        return Err(ConfigError::ValidationError(
            "loader.transcript_retain must be at least 1".to_string(),
        ));
    }
    if config.loader.timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "loader.timeout_secs must be positive".to_string(),
        ));
    }
    for (role, options) in &config.role_options {
        role.parse::<Role>()?;
        if options.len() > 30 {
            return Err(ConfigError::ValidationError(format!(
                "role '{role}' declares {} options; at most 30 are supported",
                options.len()
            )));
        }
        if let Some(bad) = options.iter().find(|o| !is_identifier(o)) {
            return Err(ConfigError::ValidationError(format!(
                "role option '{bad}' for role '{role}' is not a valid identifier"
            )));
        }
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Placement;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert!(config.loader.search_paths.is_empty());
        assert_eq!(config.loader.cache_dir, "__cload__");
        assert!(config.toolchain.cc.is_none());
        assert!(config.role_options.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[loader]
search_paths = ["src", "ext"]
placement = "before:bytecode"
cache_dir = "__cache__"
timeout_secs = 90
transcript_retain = 4
role = "debug"

[toolchain]
cc = "clang"
cxx = "clang++"
include_dirs = ["/opt/include"]
library_dirs = ["/opt/lib"]
cflags = ["-Wall"]
ldflags = ["-Wl,--as-needed"]

[role_options]
test = ["trace", "leak_check"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.loader.search_paths, vec!["src", "ext"]);
        assert_eq!(
            config.loader.placement,
            Placement::Before("bytecode".to_string())
        );
        assert_eq!(config.loader.timeout_secs, Some(90));
        assert_eq!(config.loader.transcript_retain, 4);
        assert_eq!(config.loader.role.as_deref(), Some("debug"));
        assert_eq!(config.toolchain.cc.as_deref(), Some("clang"));
        assert_eq!(config.toolchain.cflags, vec!["-Wall"]);
        assert_eq!(config.role_options["test"], vec!["trace", "leak_check"]);
    }

    #[test]
    fn search_paths_accepts_single_string() {
        let config = load_config_from_str("[loader]\nsearch_paths = \"src\"\n").unwrap();
        assert_eq!(config.loader.search_paths, vec!["src"]);
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_placement_errors() {
        let err = load_config_from_str("[loader]\nplacement = \"middle\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn cache_dir_with_separator_errors() {
        let err = load_config_from_str("[loader]\ncache_dir = \"a/b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn zero_retain_errors() {
        let err = load_config_from_str("[loader]\ntranscript_retain = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn unknown_role_in_options_errors() {
        let err = load_config_from_str("[role_options]\nrelease = [\"x\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRole(_)));
    }

    #[test]
    fn bad_option_name_errors() {
        let err = load_config_from_str("[role_options]\ntest = [\"not-valid\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn parse_sidecar() {
        let toml = r#"
[compile]
defines = { FEATURE_X = "1", PLAIN = "" }
include_dirs = ["include"]

[link]
libraries = ["m"]
frameworks = ["Foundation"]
"#;
        let sidecar = load_sidecar_from_str(toml).unwrap();
        assert_eq!(sidecar.compile.defines["FEATURE_X"], "1");
        assert_eq!(sidecar.compile.include_dirs, vec!["include"]);
        assert_eq!(sidecar.link.libraries, vec!["m"]);
        assert_eq!(sidecar.link.frameworks, vec!["Foundation"]);
        assert!(sidecar.link.library_dirs.is_empty());
    }

    #[test]
    fn sidecar_bad_define_errors() {
        let err = load_sidecar_from_str("[compile]\ndefines = { \"1BAD\" = \"x\" }\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cload.toml"), "[loader]\nrole = \"test\"\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.loader.role.as_deref(), Some("test"));
    }
}
