//! Parsing and validation of `cload.toml` loader configuration.
//!
//! This crate reads the loader configuration file and per-unit sidecar files
//! and produces strongly-typed [`Settings`] with the compilation role
//! resolved from the process environment.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_sidecar, load_sidecar_from_str};
pub use resolve::{resolve_settings, role_from_environment, Settings, ROLE_ENV_VAR};
pub use types::*;
