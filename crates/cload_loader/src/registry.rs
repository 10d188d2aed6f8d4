//! The module registry: initialized modules keyed by fully-qualified name.
//!
//! An import reserves its name before any work starts. While the reservation
//! is held, other threads importing the same name wait for the outcome. A
//! reservation that is dropped without being completed, because the import
//! failed or the importing thread unwound, removes the placeholder and wakes
//! the waiters, so a failed import never leaves an entry behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::ImportError;
use crate::module::Module;

enum Slot {
    Initializing(ThreadId),
    Ready(Arc<Module>),
}

/// Registry of initialized modules.
#[derive(Default)]
pub struct ModuleRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    changed: Condvar,
}

/// Outcome of [`ModuleRegistry::acquire`].
pub enum Acquired<'a> {
    /// The module is already initialized.
    Loaded(Arc<Module>),
    /// The caller now owns the import of this name.
    Reserved(Reservation<'a>),
}

/// Exclusive right to initialize one module name.
pub struct Reservation<'a> {
    registry: &'a ModuleRegistry,
    name: String,
    completed: bool,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the initialized module, or reserves `name` for the caller.
    ///
    /// Blocks while another thread holds the reservation. Re-entering the
    /// import of a name the calling thread is initializing is an error.
    pub fn acquire(&self, name: &str) -> Result<Acquired<'_>, ImportError> {
        let me = thread::current().id();
        let mut slots = self.slots.lock();
        loop {
            let busy = match slots.get(name) {
                Some(Slot::Ready(module)) => return Ok(Acquired::Loaded(Arc::clone(module))),
                Some(Slot::Initializing(owner)) => Some(*owner == me),
                None => None,
            };
            match busy {
                Some(true) => return Err(ImportError::Circular(name.to_string())),
                Some(false) => self.changed.wait(&mut slots),
                None => {
                    slots.insert(name.to_string(), Slot::Initializing(me));
                    return Ok(Acquired::Reserved(Reservation {
                        registry: self,
                        name: name.to_string(),
                        completed: false,
                    }));
                }
            }
        }
    }

    /// The initialized module named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        match self.slots.lock().get(name) {
            Some(Slot::Ready(module)) => Some(Arc::clone(module)),
            _ => None,
        }
    }

    /// Returns `true` when any entry, placeholder or initialized, exists.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Removes an initialized module so the next import loads it again.
    /// Placeholders are left to their owners.
    pub fn remove(&self, name: &str) -> Option<Arc<Module>> {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(name), Some(Slot::Ready(_))) {
            return None;
        }
        match slots.remove(name) {
            Some(Slot::Ready(module)) => Some(module),
            _ => None,
        }
    }

    /// Names of every initialized module, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of entries, placeholders included.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` when the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reservation<'_> {
    /// The reserved name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes the initialized module and wakes waiting importers.
    pub fn complete(mut self, module: Module) -> Arc<Module> {
        let module = Arc::new(module);
        self.registry
            .slots
            .lock()
            .insert(self.name.clone(), Slot::Ready(Arc::clone(&module)));
        self.completed = true;
        self.registry.changed.notify_all();
        module
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut slots = self.registry.slots.lock();
        if matches!(slots.get(&self.name), Some(Slot::Initializing(_))) {
            slots.remove(&self.name);
        }
        drop(slots);
        self.registry.changed.notify_all();
        log::debug!("rolled back registry entry for {}", self.name);
    }
}
