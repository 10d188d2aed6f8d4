//! Import-time compilation of foreign-source extension modules.
//!
//! A [`CLoader`] installed into a [`Runtime`] claims module paths backed by
//! C, Objective-C or C++ source files. On import it consults the on-disk
//! cache, builds the unit when the cache holds no artifact for its current
//! fingerprint, and loads the artifact as a [`Module`]. Toolchain failures
//! surface as [`ImportError::Tool`] chained to a [`ToolError`].

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod module;
mod native;
pub mod registry;
pub mod runtime;

pub use error::{CallError, ImportError, ToolError};
pub use loader::{CLoader, CLoaderBuilder, LoadEvent, FINDER_ID};
pub use module::{Function, Module, Value};
pub use native::{ABI_VERSION, SET_INJECTOR_SYMBOL};
pub use registry::{Acquired, ModuleRegistry, Reservation};
pub use runtime::{Finder, Loader, Runtime};
