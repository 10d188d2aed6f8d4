//! Error types for configuration loading and validation.

use cload_common::ParseRoleError;

/// Errors that can occur when loading or validating loader configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading a configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// No compilation role was selected by the environment or the file.
    #[error("no compilation role selected: set CLOAD_ROLE or loader.role")]
    MissingRole,

    /// The selected compilation role is not one of the known roles.
    #[error(transparent)]
    UnknownRole(#[from] ParseRoleError),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_role() {
        let err = ConfigError::MissingRole;
        assert!(format!("{err}").contains("CLOAD_ROLE"));
    }

    #[test]
    fn display_unknown_role() {
        let err = ConfigError::UnknownRole(ParseRoleError("fast".to_string()));
        assert!(format!("{err}").starts_with("unknown compilation role 'fast'"));
    }

    #[test]
    fn display_parse_error() {
        let err = ConfigError::ParseError("expected '=' at line 3".to_string());
        assert_eq!(
            format!("{err}"),
            "failed to parse configuration: expected '=' at line 3"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::IoError(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
