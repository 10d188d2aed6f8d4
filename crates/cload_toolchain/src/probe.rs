//! Environment probing: compilers, search paths, and platform conventions.
//!
//! Probing runs at most once per process for a given `[toolchain]` section.
//! Both outcomes are memoized: a process that found no compiler does not
//! search again on every import.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use cload_common::{ContentHash, FingerprintHasher, Role, SourceLanguage};
use cload_config::ToolchainSection;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ProbeError;
use crate::flags::{role_cflags, BASE_CFLAGS};
use crate::header::header_hash;

const CC_CANDIDATES: &[&str] = &["cc", "clang", "gcc"];
const CXX_CANDIDATES: &[&str] = &["c++", "clang++", "g++"];

/// Platform conventions for loadable artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Platform {
    /// Target operating system.
    pub os: String,
    /// Target architecture.
    pub arch: String,
    /// File extension of loadable artifacts.
    pub artifact_suffix: String,
    /// Flags selecting a loadable artifact at link time.
    pub link_flags: Vec<String>,
}

impl Platform {
    /// Conventions of the platform this process runs on.
    pub fn current() -> Result<Self, ProbeError> {
        let os = std::env::consts::OS;
        let link_flags: &[&str] = match os {
            "macos" | "ios" => &["-bundle", "-undefined", "dynamic_lookup"],
            "linux" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" | "android" => &["-shared"],
            _ => {
                return Err(ProbeError::UnsupportedPlatform { os: os.to_string() });
            }
        };
        Ok(Self {
            os: os.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            artifact_suffix: std::env::consts::DLL_EXTENSION.to_string(),
            link_flags: link_flags.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Returns `true` on Darwin, where frameworks exist.
    pub fn is_darwin(&self) -> bool {
        matches!(self.os.as_str(), "macos" | "ios")
    }
}

/// A compiler driver and the version it reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Compiler {
    /// Resolved path of the driver.
    pub path: PathBuf,
    /// Output of `--version`.
    pub version: String,
}

impl Compiler {
    /// First line of the version output.
    pub fn version_line(&self) -> &str {
        self.version.lines().next().unwrap_or_default()
    }
}

/// Everything needed to compile an extension compatible with this process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// C and Objective-C driver; also the fallback for C++.
    pub cc: Compiler,
    /// C++ driver, when one was found.
    pub cxx: Option<Compiler>,
    /// Include directories passed to every compile.
    pub include_dirs: Vec<PathBuf>,
    /// Library directories passed to every link.
    pub library_dirs: Vec<PathBuf>,
    /// Extra compile flags.
    pub cflags: Vec<String>,
    /// Extra link flags.
    pub ldflags: Vec<String>,
    /// Platform conventions.
    pub platform: Platform,
}

impl Environment {
    /// The driver used for `language`.
    pub fn driver_for(&self, language: SourceLanguage) -> &Compiler {
        match (language, &self.cxx) {
            (SourceLanguage::Cxx, Some(cxx)) => cxx,
            _ => &self.cc,
        }
    }

    /// Hash of everything besides the sources that shapes an artifact:
    /// drivers and their versions, flags, search paths, the role, every
    /// declared role option, and the bundled header.
    pub fn toolchain_fingerprint(
        &self,
        role: Role,
        role_options: &BTreeMap<Role, Vec<String>>,
    ) -> ContentHash {
        let mut hasher = FingerprintHasher::new();
        hasher
            .field(env!("CARGO_PKG_VERSION"))
            .hash(&header_hash())
            .field(self.cc.path.to_string_lossy().as_bytes())
            .field(&self.cc.version);
        match &self.cxx {
            Some(cxx) => hasher
                .field(cxx.path.to_string_lossy().as_bytes())
                .field(&cxx.version),
            None => hasher.field(""),
        };
        hasher.field(&self.platform.os).field(&self.platform.arch);
        for flag in BASE_CFLAGS.iter().chain(role_cflags(role)) {
            hasher.field(flag);
        }
        for list in [&self.cflags, &self.ldflags, &self.platform.link_flags] {
            hasher.field((list.len() as u64).to_le_bytes());
            for item in list {
                hasher.field(item);
            }
        }
        for list in [&self.include_dirs, &self.library_dirs] {
            hasher.field((list.len() as u64).to_le_bytes());
            for dir in list {
                hasher.field(dir.to_string_lossy().as_bytes());
            }
        }
        hasher.field(role.as_str());
        for (option_role, options) in role_options {
            hasher.field(option_role.as_str());
            hasher.field((options.len() as u64).to_le_bytes());
            for option in options {
                hasher.field(option);
            }
        }
        hasher.finish()
    }
}

/// Probes the environment once, without memoization.
pub fn probe(section: &ToolchainSection) -> Result<Environment, ProbeError> {
    let platform = Platform::current()?;
    let cc = find_compiler(section.cc.as_deref(), "CC", CC_CANDIDATES)?;
    let cxx = match find_compiler(section.cxx.as_deref(), "CXX", CXX_CANDIDATES) {
        Ok(cxx) => Some(cxx),
        Err(e) => {
            log::debug!("no C++ driver, C++ units use {}: {e}", cc.path.display());
            None
        }
    };
    Ok(Environment {
        cc,
        cxx,
        include_dirs: section.include_dirs.iter().map(PathBuf::from).collect(),
        library_dirs: section.library_dirs.iter().map(PathBuf::from).collect(),
        cflags: section.cflags.clone(),
        ldflags: section.ldflags.clone(),
        platform,
    })
}

fn find_compiler(
    configured: Option<&str>,
    env_var: &str,
    fallbacks: &[&str],
) -> Result<Compiler, ProbeError> {
    let from_env = std::env::var(env_var).ok().filter(|v| !v.trim().is_empty());
    let candidates: Vec<String> = match (configured, from_env) {
        (Some(name), _) => vec![name.to_string()],
        (None, Some(name)) => vec![name],
        (None, None) => fallbacks.iter().map(|s| s.to_string()).collect(),
    };
    for candidate in &candidates {
        if let Ok(path) = which::which(candidate) {
            let version = compiler_version(&path)?;
            return Ok(Compiler { path, version });
        }
        log::debug!("compiler candidate {candidate} not found");
    }
    Err(ProbeError::NoCompiler { tried: candidates })
}

fn compiler_version(path: &Path) -> Result<String, ProbeError> {
    let unusable = |reason: String| ProbeError::Unusable {
        path: path.to_path_buf(),
        reason,
    };
    let output = Command::new(path)
        .arg("--version")
        .output()
        .map_err(|e| unusable(e.to_string()))?;
    if !output.status.success() {
        return Err(unusable(format!("--version exited with {}", output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Memoizing prober for one `[toolchain]` section.
pub struct Prober {
    section: ToolchainSection,
    result: OnceLock<Result<Arc<Environment>, ProbeError>>,
}

impl Prober {
    /// Creates a prober that has not probed yet.
    pub fn new(section: ToolchainSection) -> Self {
        Self {
            section,
            result: OnceLock::new(),
        }
    }

    /// A prober whose result is already known.
    pub fn with_environment(env: Environment) -> Self {
        let prober = Self::new(ToolchainSection::default());
        let _ = prober.result.set(Ok(Arc::new(env)));
        prober
    }

    /// A prober whose probe is known to have failed.
    pub fn failed(error: ProbeError) -> Self {
        let prober = Self::new(ToolchainSection::default());
        let _ = prober.result.set(Err(error));
        prober
    }

    /// The process-wide prober for `section`.
    pub fn shared(section: &ToolchainSection) -> Arc<Prober> {
        static PROBERS: OnceLock<Mutex<HashMap<ToolchainSection, Arc<Prober>>>> = OnceLock::new();
        let probers = PROBERS.get_or_init(Default::default);
        let mut probers = probers.lock();
        Arc::clone(
            probers
                .entry(section.clone())
                .or_insert_with(|| Arc::new(Prober::new(section.clone()))),
        )
    }

    /// Probes on first use and returns the memoized outcome afterwards.
    pub fn probe(&self) -> Result<Arc<Environment>, ProbeError> {
        self.result
            .get_or_init(|| {
                let result = probe(&self.section).map(Arc::new);
                match &result {
                    Ok(env) => log::debug!(
                        "probed toolchain: cc {} ({})",
                        env.cc.path.display(),
                        env.cc.version_line()
                    ),
                    Err(e) => log::warn!("toolchain probe failed: {e}"),
                }
                result
            })
            .clone()
    }
}
