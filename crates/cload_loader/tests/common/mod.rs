//! Shared helpers for the loader integration tests.
//!
//! Each test copies the fixtures it needs into a fresh temporary source
//! tree, so cache directories never leak between tests or into the
//! repository.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cload_cache::UnitCache;
use cload_common::{Role, SourceLanguage, UnitIdentity};
use cload_config::{Settings, ToolchainSection, DEFAULT_CACHE_DIR};
use cload_loader::{CLoader, LoadEvent};
use tempfile::TempDir;

/// Directory holding the C fixtures.
pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Returns `true` when a compiler is available. Tests that need one return
/// early otherwise.
pub fn toolchain_available() -> bool {
    match cload_toolchain::probe(&ToolchainSection::default()) {
        Ok(_) => true,
        Err(e) => {
            eprintln!("skipping: {e}");
            false
        }
    }
}

/// Creates a source tree holding copies of `fixtures` (paths relative to
/// the fixtures directory).
pub fn project(fixtures: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in fixtures {
        let dest = dir.path().join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::copy(fixtures_dir().join(name), &dest).unwrap();
    }
    dir
}

/// Settings searching `root` under `role`.
pub fn settings(root: &Path, role: Role) -> Settings {
    Settings::new(role, vec![root.to_path_buf()])
}

/// A fresh loader searching `root` under `role`.
pub fn loader(root: &Path, role: Role) -> CLoader {
    CLoader::builder(settings(root, role)).build().unwrap()
}

/// Records every load event of `loader`.
pub fn record_events(loader: &CLoader) -> Arc<Mutex<Vec<LoadEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    loader.add_observer(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

/// The role cache directory of `file` under `root`, imported under the
/// module path that mirrors its relative path (`pkg/nested.c` is
/// `pkg.nested`).
pub fn cache_root(root: &Path, file: &str, role: Role) -> PathBuf {
    let source = root.join(file).canonicalize().unwrap();
    let module = file.rsplit_once('.').unwrap().0.replace('/', ".");
    let language = SourceLanguage::from_path(&source).unwrap();
    let identity = UnitIdentity::new(module, source, language);
    UnitCache::open(identity, role, DEFAULT_CACHE_DIR, 1)
        .root()
        .to_path_buf()
}
