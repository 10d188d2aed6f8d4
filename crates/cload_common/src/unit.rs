//! Source units: the foreign-source files the loader compiles on import.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hash::{ContentHash, FingerprintHasher};
use crate::role::Role;

/// Foreign source language detected from a file suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLanguage {
    /// ISO C (`.c`).
    C,
    /// Objective-C (`.m`).
    ObjC,
    /// C++ (`.cxx`, `.cpp`, `.cc`).
    Cxx,
}

impl SourceLanguage {
    /// Recognised suffixes in resolution order. The first match in a search
    /// root wins, so C takes precedence over Objective-C and C++.
    pub const SUFFIXES: [(&'static str, SourceLanguage); 5] = [
        ("c", SourceLanguage::C),
        ("m", SourceLanguage::ObjC),
        ("cxx", SourceLanguage::Cxx),
        ("cpp", SourceLanguage::Cxx),
        ("cc", SourceLanguage::Cxx),
    ];

    /// Detects the language of a path from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::SUFFIXES
            .iter()
            .find(|(suffix, _)| *suffix == ext)
            .map(|(_, lang)| *lang)
    }

    /// The language name understood by the compiler driver's `-x` flag.
    pub fn driver_name(self) -> &'static str {
        match self {
            SourceLanguage::C => "c",
            SourceLanguage::ObjC => "objective-c",
            SourceLanguage::Cxx => "c++",
        }
    }
}

/// Identity of a source unit: module path, absolute source path, language.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitIdentity {
    /// Fully-qualified, dot-separated module path (e.g. `pkg.fixture`).
    pub module_path: String,
    /// Absolute path of the source file.
    pub source: PathBuf,
    /// Language detected from the source suffix.
    pub language: SourceLanguage,
}

impl UnitIdentity {
    /// Creates an identity.
    pub fn new(module_path: impl Into<String>, source: PathBuf, language: SourceLanguage) -> Self {
        Self {
            module_path: module_path.into(),
            source,
            language,
        }
    }

    /// The last component of the module path.
    pub fn basename(&self) -> &str {
        self.module_path
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.module_path)
    }

    /// The containing package, if the module is nested.
    pub fn package(&self) -> Option<&str> {
        self.module_path.rsplit_once('.').map(|(pkg, _)| pkg)
    }

    /// Name of the initialization symbol exported by the compiled artifact.
    pub fn init_symbol(&self) -> String {
        format!("cload_init_{}", self.basename())
    }

    /// Directory that holds the source file.
    pub fn source_dir(&self) -> &Path {
        self.source.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name of the source, used to name its cache directory.
    pub fn source_file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.basename().to_string())
    }

    /// Stable hash of the identity fields.
    pub fn key(&self) -> ContentHash {
        FingerprintHasher::new()
            .field(&self.module_path)
            .field(self.source.to_string_lossy().as_bytes())
            .field(self.language.driver_name())
            .finish()
    }
}

/// A source unit discovered for one import attempt.
///
/// Immutable once discovered; a fresh unit is resolved on every import.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    /// The unit's identity.
    pub identity: UnitIdentity,
    /// Compilation role active for this attempt.
    pub role: Role,
    /// Optional `<stem>.cload.toml` sidecar declaring extra build inputs.
    pub sidecar: Option<PathBuf>,
}

impl SourceUnit {
    /// Path of the sidecar file that would accompany `source`.
    pub fn sidecar_path(source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        source.with_file_name(format!("{stem}.cload.toml"))
    }
}
