//! The host runtime's import protocol.
//!
//! Imports go through an ordered list of [`Finder`]s. Each finder either
//! declines a module path (`Ok(None)`) or returns a [`Loader`] that executes
//! the import. The first finder to claim a path wins; declining is never an
//! error, so finders that only handle some paths compose freely.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use cload_config::Placement;
use parking_lot::RwLock;

use crate::error::ImportError;
use crate::module::Module;
use crate::registry::{Acquired, ModuleRegistry};

/// Resolves module paths to loaders.
pub trait Finder: Send + Sync {
    /// Identifier used for idempotent installation and relative placement.
    fn id(&self) -> &str;

    /// Returns a loader for `fullname`, or `None` when this finder does not
    /// handle it.
    fn find(&self, fullname: &str) -> Result<Option<Box<dyn Loader>>, ImportError>;
}

/// Executes the import of one resolved module.
pub trait Loader: Send {
    /// Fully-qualified module path.
    fn fullname(&self) -> &str;

    /// The file backing the module, if any.
    fn origin(&self) -> Option<&Path>;

    /// Produces the initialized module.
    fn exec(self: Box<Self>) -> Result<Module, ImportError>;
}

/// Import handler list and module registry.
#[derive(Default)]
pub struct Runtime {
    finders: RwLock<Vec<Arc<dyn Finder>>>,
    registry: ModuleRegistry,
}

impl Runtime {
    /// Creates a runtime with no finders.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide runtime.
    pub fn global() -> &'static Runtime {
        static GLOBAL: OnceLock<Runtime> = OnceLock::new();
        GLOBAL.get_or_init(Runtime::new)
    }

    /// Installs `finder` at `placement`.
    ///
    /// Returns `false`, leaving the list unchanged, when a finder with the
    /// same id is already installed. A relative placement naming a finder
    /// that is not installed falls back to appending.
    pub fn install(&self, finder: Arc<dyn Finder>, placement: &Placement) -> bool {
        let mut finders = self.finders.write();
        if finders.iter().any(|f| f.id() == finder.id()) {
            log::debug!("finder {} already installed", finder.id());
            return false;
        }
        let position_of = |id: &str| finders.iter().position(|f| f.id() == id);
        let index = match placement {
            Placement::Append => finders.len(),
            Placement::Prepend => 0,
            Placement::Before(id) => position_of(id).unwrap_or_else(|| {
                log::warn!("finder {id} not installed, appending {}", finder.id());
                finders.len()
            }),
            Placement::After(id) => position_of(id).map(|i| i + 1).unwrap_or_else(|| {
                log::warn!("finder {id} not installed, appending {}", finder.id());
                finders.len()
            }),
        };
        log::debug!("installing finder {} at {index}", finder.id());
        finders.insert(index, finder);
        true
    }

    /// Removes the finder with `id`. Returns `true` if one was installed.
    pub fn uninstall(&self, id: &str) -> bool {
        let mut finders = self.finders.write();
        let before = finders.len();
        finders.retain(|f| f.id() != id);
        finders.len() != before
    }

    /// Ids of the installed finders, in consultation order.
    pub fn finder_ids(&self) -> Vec<String> {
        self.finders.read().iter().map(|f| f.id().to_string()).collect()
    }

    /// The module registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Imports `fullname`, returning the registered module when it was
    /// already initialized.
    ///
    /// On failure the registry holds no entry for `fullname`.
    pub fn import(&self, fullname: &str) -> Result<Arc<Module>, ImportError> {
        let reservation = match self.registry.acquire(fullname)? {
            Acquired::Loaded(module) => return Ok(module),
            Acquired::Reserved(reservation) => reservation,
        };

        let finders: Vec<Arc<dyn Finder>> = self.finders.read().clone();
        for finder in finders {
            let Some(loader) = finder.find(fullname)? else {
                continue;
            };
            log::debug!(
                "{} claimed {fullname} ({})",
                finder.id(),
                loader
                    .origin()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            let module = loader.exec()?;
            return Ok(reservation.complete(module));
        }
        Err(ImportError::NotFound(fullname.to_string()))
    }
}
