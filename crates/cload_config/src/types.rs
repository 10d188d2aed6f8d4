//! Configuration types deserialized from `cload.toml` and unit sidecars.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the loader configuration file.
pub const CONFIG_FILE: &str = "cload.toml";

/// Default name of the cache directory colocated with each source file.
pub const DEFAULT_CACHE_DIR: &str = "__cload__";

/// The top-level loader configuration parsed from `cload.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct LoaderConfig {
    /// Import-time behavior: search roots, placement, cache and timeouts.
    #[serde(default)]
    pub loader: LoaderSection,
    /// Compiler selection and extra flags.
    #[serde(default)]
    pub toolchain: ToolchainSection,
    /// Per-role option names, each becoming a compile-time feature bit.
    #[serde(default)]
    pub role_options: BTreeMap<String, Vec<String>>,
}

/// The `[loader]` section.
#[derive(Debug, Deserialize)]
pub struct LoaderSection {
    /// Directories scanned for foreign-source modules, relative to the
    /// configuration file. Accepts a string or a list of strings.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub search_paths: Vec<String>,
    /// Where the loader is placed among sibling import handlers.
    #[serde(default)]
    pub placement: Placement,
    /// Name of the cache directory created next to each source file.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Wall-clock limit for each toolchain subprocess, in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of build attempts kept in each transcript log.
    #[serde(default = "default_transcript_retain")]
    pub transcript_retain: usize,
    /// Age after which abandoned build workspaces are purged, in seconds.
    #[serde(default = "default_stale_workspace_secs")]
    pub stale_workspace_secs: u64,
    /// Compilation role used when `CLOAD_ROLE` is not set.
    pub role: Option<String>,
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_transcript_retain() -> usize {
    16
}

fn default_stale_workspace_secs() -> u64 {
    3600
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            placement: Placement::default(),
            cache_dir: default_cache_dir(),
            timeout_secs: None,
            transcript_retain: default_transcript_retain(),
            stale_workspace_secs: default_stale_workspace_secs(),
            role: None,
        }
    }
}

/// The `[toolchain]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct ToolchainSection {
    /// C and Objective-C compiler driver (name or path). Overrides `CC`.
    pub cc: Option<String>,
    /// C++ compiler driver (name or path). Overrides `CXX`.
    pub cxx: Option<String>,
    /// Extra include directories passed to every compile.
    #[serde(default)]
    pub include_dirs: Vec<String>,
    /// Extra library directories passed to every link.
    #[serde(default)]
    pub library_dirs: Vec<String>,
    /// Extra compile flags appended after the role flags.
    #[serde(default)]
    pub cflags: Vec<String>,
    /// Extra link flags appended after the role flags.
    #[serde(default)]
    pub ldflags: Vec<String>,
}

/// Placement of the loader in the host runtime's handler list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Placement {
    /// After every handler already installed (default).
    #[default]
    Append,
    /// Before every handler already installed.
    Prepend,
    /// Immediately before the named handler.
    Before(String),
    /// Immediately after the named handler.
    After(String),
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Placement::Append),
            "prepend" => Ok(Placement::Prepend),
            _ => match s.split_once(':') {
                Some(("before", id)) if !id.is_empty() => Ok(Placement::Before(id.to_string())),
                Some(("after", id)) if !id.is_empty() => Ok(Placement::After(id.to_string())),
                _ => Err(format!(
                    "invalid placement '{s}' (expected append, prepend, before:<id> or after:<id>)"
                )),
            },
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Append => f.write_str("append"),
            Placement::Prepend => f.write_str("prepend"),
            Placement::Before(id) => write!(f, "before:{id}"),
            Placement::After(id) => write!(f, "after:{id}"),
        }
    }
}

impl<'de> Deserialize<'de> for Placement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Per-unit build inputs declared in a `<stem>.cload.toml` sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UnitSidecar {
    /// Extra compile inputs.
    #[serde(default)]
    pub compile: SidecarCompile,
    /// Extra link dependencies.
    #[serde(default)]
    pub link: SidecarLink,
}

/// The `[compile]` table of a sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SidecarCompile {
    /// Preprocessor defines; an empty value defines the name without a value.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    /// Include directories relative to the source file.
    #[serde(default)]
    pub include_dirs: Vec<String>,
}

/// The `[link]` table of a sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SidecarLink {
    /// Libraries linked with `-l`.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Library directories relative to the source file.
    #[serde(default)]
    pub library_dirs: Vec<String>,
    /// Frameworks linked with `-framework` (Darwin only).
    #[serde(default)]
    pub frameworks: Vec<String>,
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_parse() {
        assert_eq!("append".parse::<Placement>().unwrap(), Placement::Append);
        assert_eq!("prepend".parse::<Placement>().unwrap(), Placement::Prepend);
        assert_eq!(
            "before:bytecode".parse::<Placement>().unwrap(),
            Placement::Before("bytecode".to_string())
        );
        assert_eq!(
            "after:builtin".parse::<Placement>().unwrap(),
            Placement::After("builtin".to_string())
        );
        assert!("before:".parse::<Placement>().is_err());
        assert!("sideways".parse::<Placement>().is_err());
    }

    #[test]
    fn placement_display_roundtrips() {
        for p in [
            Placement::Append,
            Placement::Prepend,
            Placement::Before("x".to_string()),
            Placement::After("y".to_string()),
        ] {
            assert_eq!(p.to_string().parse::<Placement>().unwrap(), p);
        }
    }

    #[test]
    fn loader_section_defaults() {
        let section = LoaderSection::default();
        assert_eq!(section.cache_dir, "__cload__");
        assert_eq!(section.transcript_retain, 16);
        assert_eq!(section.placement, Placement::Append);
        assert!(section.timeout_secs.is_none());
    }
}
