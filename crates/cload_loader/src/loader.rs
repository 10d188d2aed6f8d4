//! The compiled-extension loader.
//!
//! [`CLoader`] claims module paths backed by foreign source files under its
//! search roots. Loading a unit fingerprints its inputs, reuses the cached
//! artifact when the fingerprint matches, and otherwise builds, records the
//! transcript, and commits the new artifact before loading it. Builds of
//! one unit are serialized within the process; a failed build leaves the
//! cache as it was.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cload_cache::{BuildLocks, CacheEntry, CacheError, Lookup, SourceStamp, UnitCache};
use cload_common::{AttemptId, Fingerprint, Role, SourceLanguage, SourceUnit, UnitIdentity};
use cload_config::{
    load_config, load_sidecar, resolve_settings, role_from_environment, LoaderConfig, Settings,
    UnitSidecar, CONFIG_FILE,
};
use cload_toolchain::injection::check_role;
use cload_toolchain::{BuildRequest, BuildStatus, InjectionTable, Invoker, Phase, Prober};
use parking_lot::{Mutex, RwLock};

use crate::error::{ImportError, ToolError};
use crate::module::Module;
use crate::native;
use crate::runtime::{Finder, Loader, Runtime};

/// Id under which the loader is installed in a [`Runtime`].
pub const FINDER_ID: &str = "cload";

/// Reported to observers after every successful load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadEvent {
    /// Module path of the unit.
    pub module: String,
    /// The artifact that was loaded.
    pub artifact: PathBuf,
    /// Role the artifact was built for.
    pub role: Role,
    /// `true` when no build ran.
    pub cache_hit: bool,
}

type Observer = Box<dyn Fn(&LoadEvent) + Send + Sync>;

struct Inner {
    settings: Settings,
    prober: Arc<Prober>,
    injections: Option<Arc<InjectionTable>>,
    cancel: Option<Arc<AtomicBool>>,
    invokers: Mutex<HashMap<Role, Arc<Invoker>>>,
    observers: RwLock<Vec<Observer>>,
    builds: AtomicUsize,
}

/// Loader for foreign-source extension modules. Clones share state.
#[derive(Clone)]
pub struct CLoader {
    inner: Arc<Inner>,
}

/// Configures a [`CLoader`].
pub struct CLoaderBuilder {
    settings: Settings,
    prober: Option<Arc<Prober>>,
    injections: Option<InjectionTable>,
    cancel: Option<Arc<AtomicBool>>,
}

impl CLoaderBuilder {
    /// Uses `prober` instead of the process-wide prober for the configured
    /// toolchain.
    pub fn prober(mut self, prober: Arc<Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Forces failures of toolchain steps listed in `table`. Test role only.
    pub fn injections(mut self, table: InjectionTable) -> Self {
        self.injections = Some(table);
        self
    }

    /// Abandons running builds once `flag` is raised.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Creates the loader.
    pub fn build(self) -> Result<CLoader, ImportError> {
        if self.injections.is_some() {
            check_role(self.settings.role)?;
        }
        let prober = self
            .prober
            .unwrap_or_else(|| Prober::shared(&self.settings.toolchain));
        Ok(CLoader {
            inner: Arc::new(Inner {
                settings: self.settings,
                prober,
                injections: self.injections.map(Arc::new),
                cancel: self.cancel,
                invokers: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                builds: AtomicUsize::new(0),
            }),
        })
    }
}

impl CLoader {
    /// Starts configuring a loader for `settings`.
    pub fn builder(settings: Settings) -> CLoaderBuilder {
        CLoaderBuilder {
            settings,
            prober: None,
            injections: None,
            cancel: None,
        }
    }

    /// A loader configured from `<dir>/cload.toml`, if present, and the
    /// process environment. Without configured search paths, `dir` itself
    /// is searched.
    pub fn from_environment(dir: &Path) -> Result<CLoader, ImportError> {
        let config = if dir.join(CONFIG_FILE).is_file() {
            load_config(dir)?
        } else {
            LoaderConfig::default()
        };
        let mut settings = resolve_settings(&config, dir, role_from_environment().as_deref())?;
        if settings.search_paths.is_empty() {
            settings.search_paths.push(dir.to_path_buf());
        }
        CLoader::builder(settings).build()
    }

    /// The loader's settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Number of builds started by this loader (and its clones).
    pub fn build_count(&self) -> usize {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// Registers `observer` to be called after every successful load.
    pub fn add_observer(&self, observer: impl Fn(&LoadEvent) + Send + Sync + 'static) {
        self.inner.observers.write().push(Box::new(observer));
    }

    /// Installs the loader into `runtime` at the configured placement.
    /// Returns `false` if it was already installed.
    pub fn install(&self, runtime: &Runtime) -> bool {
        runtime.install(Arc::new(self.clone()), &self.inner.settings.placement)
    }

    /// Finds the source file backing `module_path`.
    ///
    /// Search roots are scanned in order, and within a root the suffixes in
    /// [`SourceLanguage::SUFFIXES`] order. `None` means the path is not a
    /// foreign-source module.
    pub fn resolve(&self, module_path: &str) -> Option<SourceUnit> {
        let parts: Vec<&str> = module_path.split('.').collect();
        let valid = parts
            .iter()
            .all(|p| !p.is_empty() && *p != ".." && !p.contains(['/', '\\']));
        let (last, packages) = parts.split_last()?;
        if !valid {
            return None;
        }

        for root in &self.inner.settings.search_paths {
            let dir = packages.iter().fold(root.clone(), |dir, p| dir.join(p));
            for (suffix, language) in SourceLanguage::SUFFIXES {
                let candidate = dir.join(format!("{last}.{suffix}"));
                if !candidate.is_file() {
                    continue;
                }
                let source = candidate.canonicalize().unwrap_or(candidate);
                let sidecar = SourceUnit::sidecar_path(&source);
                log::debug!("resolved {module_path} to {}", source.display());
                return Some(SourceUnit {
                    identity: UnitIdentity::new(module_path, source, language),
                    role: self.inner.settings.role,
                    sidecar: sidecar.is_file().then_some(sidecar),
                });
            }
        }
        None
    }

    /// Produces the module of `unit`, building it if the cache holds no
    /// artifact for its current fingerprint.
    pub fn load(&self, unit: &SourceUnit) -> Result<Module, ImportError> {
        let settings = &self.inner.settings;
        let identity = &unit.identity;
        let cache_error = |source: CacheError| ImportError::Cache {
            module: identity.module_path.clone(),
            source,
        };

        let _guard = BuildLocks::global().lock(identity.key());
        let cache = UnitCache::open(
            identity.clone(),
            unit.role,
            &settings.cache_dir_name,
            settings.transcript_retain,
        );
        let sidecar = unit.sidecar.as_deref().map(load_sidecar).transpose()?;
        let mut inputs = vec![identity.source.clone()];
        inputs.extend(unit.sidecar.iter().cloned());
        let stamp = cache.content_fingerprint(&inputs).map_err(cache_error)?;

        let invoker = match self.invoker(unit.role, &identity.module_path) {
            Ok(invoker) => invoker,
            Err(ImportError::Environment { module, source }) => {
                return match cache.lookup_content_only(&stamp.content) {
                    Some(entry) => {
                        log::warn!("{module}: no usable toolchain ({source}), loading cached artifact");
                        self.open(unit, &entry, true)
                    }
                    None => Err(ImportError::Environment { module, source }),
                };
            }
            Err(e) => return Err(e),
        };

        let fingerprint = Fingerprint {
            content: stamp.content,
            toolchain: invoker.toolchain_fingerprint(),
        };
        match cache.lookup(&fingerprint) {
            Lookup::Fresh(entry) => return self.open(unit, &entry, true),
            Lookup::Stale(record) => log::debug!(
                "{}: cached build {} is stale",
                identity.module_path,
                record.attempt
            ),
            Lookup::Absent => log::debug!("{}: not cached", identity.module_path),
        }

        let entry = self.build(&cache, &invoker, sidecar.as_ref(), fingerprint, &stamp)?;
        self.open(unit, &entry, false)
    }

    fn invoker(&self, role: Role, module: &str) -> Result<Arc<Invoker>, ImportError> {
        let mut invokers = self.inner.invokers.lock();
        if let Some(invoker) = invokers.get(&role) {
            return Ok(Arc::clone(invoker));
        }
        let env = self
            .inner
            .prober
            .probe()
            .map_err(|source| ImportError::Environment {
                module: module.to_string(),
                source,
            })?;
        let settings = &self.inner.settings;
        let mut invoker = Invoker::new(env, role, settings.role_options.clone())
            .with_timeout(settings.timeout);
        if let Some(table) = self.inner.injections.as_ref().filter(|_| role.is_test()) {
            invoker = invoker.with_injections(Arc::clone(table))?;
        }
        let invoker = Arc::new(invoker);
        invokers.insert(role, Arc::clone(&invoker));
        Ok(invoker)
    }

    fn build(
        &self,
        cache: &UnitCache,
        invoker: &Invoker,
        sidecar: Option<&UnitSidecar>,
        fingerprint: Fingerprint,
        stamp: &SourceStamp,
    ) -> Result<CacheEntry, ImportError> {
        let identity = cache.identity();
        let module = identity.module_path.clone();
        let cache_error = |source: CacheError| ImportError::Cache {
            module: module.clone(),
            source,
        };

        if let Err(e) = cache.purge_stale_workspaces(self.inner.settings.stale_workspace_after) {
            log::warn!("{module}: cannot purge stale workspaces: {e}");
        }
        let attempt = AttemptId::next();
        let workspace = cache.begin_build(&attempt).map_err(cache_error)?;
        self.inner.builds.fetch_add(1, Ordering::SeqCst);

        let request = BuildRequest {
            identity,
            sidecar,
            workspace: workspace.path(),
            cancel: self.inner.cancel.as_deref(),
        };
        let result = invoker
            .build(&request)
            .map_err(|source| ImportError::Workspace {
                module: module.clone(),
                source,
            })?;
        let transcript = cache
            .transcript()
            .record(&attempt, &result.transcript)
            .map_err(cache_error)?;

        let artifact = match (&result.status, &result.artifact) {
            (BuildStatus::Success, Some(artifact)) => artifact,
            _ => {
                let phase = result.failed_phase().unwrap_or(Phase::Link);
                log::info!("{module}: {phase} failed, see {transcript}");
                return Err(ImportError::Tool {
                    module: module.clone(),
                    source: ToolError {
                        module: module.clone(),
                        phase,
                        exit_code: result.exit_code,
                        timed_out: result.timed_out,
                        cancelled: result.cancelled,
                        transcript,
                    },
                });
            }
        };

        let entry = cache
            .commit(fingerprint, stamp, artifact, &transcript)
            .map_err(cache_error)?;
        if let Err(e) = cache.gc() {
            log::warn!("{module}: cannot remove old artifacts: {e}");
        }
        Ok(entry)
    }

    fn open(&self, unit: &SourceUnit, entry: &CacheEntry, cache_hit: bool) -> Result<Module, ImportError> {
        let module = native::open(&entry.artifact_path, &unit.identity, unit.role)?;
        let event = LoadEvent {
            module: unit.identity.module_path.clone(),
            artifact: entry.artifact_path.clone(),
            role: unit.role,
            cache_hit,
        };
        for observer in self.inner.observers.read().iter() {
            observer(&event);
        }
        Ok(module)
    }
}

impl Finder for CLoader {
    fn id(&self) -> &str {
        FINDER_ID
    }

    fn find(&self, fullname: &str) -> Result<Option<Box<dyn Loader>>, ImportError> {
        Ok(self.resolve(fullname).map(|unit| {
            Box::new(UnitLoader {
                loader: self.clone(),
                unit,
            }) as Box<dyn Loader>
        }))
    }
}

struct UnitLoader {
    loader: CLoader,
    unit: SourceUnit,
}

impl Loader for UnitLoader {
    fn fullname(&self) -> &str {
        &self.unit.identity.module_path
    }

    fn origin(&self) -> Option<&Path> {
        Some(&self.unit.identity.source)
    }

    fn exec(self: Box<Self>) -> Result<Module, ImportError> {
        self.loader.load(&self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cload_config::Placement;
    use cload_toolchain::ProbeError;

    fn settings(root: &Path, role: Role) -> Settings {
        Settings::new(role, vec![root.to_path_buf()])
    }

    /// A prober that always fails, so no test here runs a compiler.
    fn no_toolchain() -> Arc<Prober> {
        Arc::new(Prober::failed(ProbeError::NoCompiler {
            tried: vec!["cc".to_string()],
        }))
    }

    fn loader(root: &Path, role: Role) -> CLoader {
        CLoader::builder(settings(root, role))
            .prober(no_toolchain())
            .build()
            .unwrap()
    }

    #[test]
    fn resolve_nested_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/fixture.c"), "int x;\n").unwrap();

        let unit = loader(dir.path(), Role::Debug).resolve("pkg.fixture").unwrap();
        assert_eq!(unit.identity.module_path, "pkg.fixture");
        assert_eq!(unit.identity.language, SourceLanguage::C);
        assert!(unit.identity.source.is_absolute());
        assert!(unit.identity.source.ends_with("pkg/fixture.c"));
        assert_eq!(unit.role, Role::Debug);
        assert!(unit.sidecar.is_none());
    }

    #[test]
    fn resolve_prefers_suffix_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("both.cpp"), "").unwrap();
        std::fs::write(dir.path().join("both.c"), "").unwrap();
        std::fs::write(dir.path().join("objc.m"), "").unwrap();
        let loader = loader(dir.path(), Role::Debug);
        assert_eq!(
            loader.resolve("both").unwrap().identity.language,
            SourceLanguage::C
        );
        assert_eq!(
            loader.resolve("objc").unwrap().identity.language,
            SourceLanguage::ObjC
        );
    }

    #[test]
    fn resolve_misses_are_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain.txt"), "").unwrap();
        let loader = loader(dir.path(), Role::Debug);
        assert!(loader.resolve("plain").is_none());
        assert!(loader.resolve("missing").is_none());
        assert!(loader.resolve("").is_none());
        assert!(loader.resolve("a..b").is_none());
    }

    #[test]
    fn resolve_picks_up_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ext.c"), "").unwrap();
        std::fs::write(dir.path().join("ext.cload.toml"), "[link]\nlibraries = [\"m\"]\n").unwrap();
        let unit = loader(dir.path(), Role::Debug).resolve("ext").unwrap();
        assert!(unit.sidecar.unwrap().ends_with("ext.cload.toml"));
    }

    #[test]
    fn later_roots_are_searched() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("late.c"), "").unwrap();
        let loader = CLoader::builder(Settings::new(
            Role::Debug,
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        ))
        .prober(no_toolchain())
        .build()
        .unwrap();
        let unit = loader.resolve("late").unwrap();
        assert!(unit.identity.source.starts_with(second.path().canonicalize().unwrap()));
    }

    #[test]
    fn injections_outside_test_role_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = CLoader::builder(settings(dir.path(), Role::Optimized))
            .injections(InjectionTable::new().with("build", "compile", 5))
            .build();
        assert!(matches!(result, Err(ImportError::Injection(_))));
    }

    #[test]
    fn missing_toolchain_without_cache_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lonely.c"), "int x;\n").unwrap();
        let loader = loader(dir.path(), Role::Debug);
        let unit = loader.resolve("lonely").unwrap();
        let err = loader.load(&unit).unwrap_err();
        assert!(matches!(err, ImportError::Environment { .. }));
        assert_eq!(loader.build_count(), 0);
    }

    #[test]
    fn bad_sidecar_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ext.c"), "").unwrap();
        std::fs::write(dir.path().join("ext.cload.toml"), "[compile\n").unwrap();
        let loader = loader(dir.path(), Role::Debug);
        let unit = loader.resolve("ext").unwrap();
        assert!(matches!(loader.load(&unit), Err(ImportError::Config(_))));
    }

    #[test]
    fn install_uses_configured_placement() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new();
        let mut s = settings(dir.path(), Role::Debug);
        s.placement = Placement::Prepend;
        let loader = CLoader::builder(s).prober(no_toolchain()).build().unwrap();
        assert!(loader.install(&runtime));
        assert!(!loader.clone().install(&runtime));
        assert_eq!(runtime.finder_ids(), vec![FINDER_ID]);
    }

    #[test]
    fn finder_declines_non_source_paths() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new();
        loader(dir.path(), Role::Debug).install(&runtime);
        assert!(matches!(
            runtime.import("json"),
            Err(ImportError::NotFound(_))
        ));
    }

    #[test]
    fn from_environment_defaults_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cload.toml"), "[loader]\nrole = \"debug\"\n").unwrap();
        if role_from_environment().is_some() {
            return;
        }
        let loader = CLoader::from_environment(dir.path()).unwrap();
        assert_eq!(loader.settings().role, Role::Debug);
        assert_eq!(loader.settings().search_paths, vec![dir.path().to_path_buf()]);
    }
}
