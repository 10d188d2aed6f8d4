//! Module objects handed to importers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::error::CallError;
use crate::native::{self, RawFn};

/// A value returned by a native function.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// No value.
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string, copied out of the extension.
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// An entry of a module's method table.
#[derive(Clone)]
pub struct Function {
    name: String,
    doc: Option<String>,
    entry: RawFn,
}

impl Function {
    pub(crate) fn new(name: String, doc: Option<String>, entry: RawFn) -> Self {
        Self { name, doc, entry }
    }

    /// Exported name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documentation string, if the table provides one.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

/// An initialized module.
///
/// Modules built from foreign source keep their library loaded for as long
/// as the module (or a clone of its library handle) is alive.
pub struct Module {
    name: String,
    origin: Option<PathBuf>,
    doc: Option<String>,
    functions: Vec<Function>,
    library: Option<Arc<Library>>,
}

impl Module {
    /// A module without native code, for finders that do not build.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            doc: None,
            functions: Vec::new(),
            library: None,
        }
    }

    pub(crate) fn native(
        name: String,
        origin: PathBuf,
        doc: Option<String>,
        functions: Vec<Function>,
        library: Arc<Library>,
    ) -> Self {
        Self {
            name,
            origin: Some(origin),
            doc,
            functions,
            library: Some(library),
        }
    }

    /// Sets the origin path.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Fully-qualified module path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file the module was loaded from.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Module documentation.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Exported functions, in table order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Looks up an exported function.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Returns `true` when the loaded library exports `symbol`.
    pub fn exports_symbol(&self, symbol: &str) -> bool {
        self.library
            .as_deref()
            .is_some_and(|lib| native::has_symbol(lib, symbol))
    }

    /// Calls the zero-argument function `name`.
    pub fn call(&self, name: &str) -> Result<Value, CallError> {
        let function = self.function(name).ok_or_else(|| CallError::NoSuchFunction {
            module: self.name.clone(),
            function: name.to_string(),
        })?;
        // The entry points into `self.library`, which outlives this call.
        native::call(function.entry).map_err(|reason| CallError::BadValue {
            module: self.name.clone(),
            function: name.to_string(),
            reason,
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}
