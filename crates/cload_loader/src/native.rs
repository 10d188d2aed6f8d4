//! The native module ABI declared by `cload.h`, and loading of artifacts.
//!
//! An artifact exports one init symbol, `cload_init_<basename>`, returning a
//! pointer to a static module descriptor: ABI version, qualified name,
//! documentation, and a method table of zero-argument functions returning a
//! tagged value. Artifacts built in the test role also export
//! `cload_set_injector`, through which the process-wide injection table is
//! made visible to their `CLOAD_SYSCALL` wrappers.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::Path;
use std::sync::Arc;

use cload_common::{Role, UnitIdentity};
use cload_toolchain::injection::injection_trampoline;
use libloading::Library;

use crate::error::ImportError;
use crate::module::{Function, Module, Value};

/// Version of the descriptor layout this loader understands.
pub const ABI_VERSION: u32 = 1;

/// Symbol exported by test-role artifacts to receive the injector.
pub const SET_INJECTOR_SYMBOL: &str = "cload_set_injector";

const TAG_NONE: i32 = 0;
const TAG_BOOL: i32 = 1;
const TAG_INT: i32 = 2;
const TAG_FLOAT: i32 = 3;
const TAG_STR: i32 = 4;

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union RawPayload {
    i: i64,
    f: f64,
    s: *const c_char,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawValue {
    tag: i32,
    payload: RawPayload,
}

pub(crate) type RawFn = unsafe extern "C" fn() -> RawValue;

#[repr(C)]
struct RawMethod {
    name: *const c_char,
    func: Option<RawFn>,
    doc: *const c_char,
}

#[repr(C)]
struct RawModule {
    abi_version: u32,
    qname: *const c_char,
    doc: *const c_char,
    methods: *const RawMethod,
    count: usize,
}

type InitFn = unsafe extern "C" fn() -> *const RawModule;
type Injector = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
type SetInjectorFn = unsafe extern "C" fn(Option<Injector>);

/// Copies a NUL-terminated string; `None` for null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn opt_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// # Safety
///
/// String payloads must point to NUL-terminated static storage.
unsafe fn value_from_raw(raw: RawValue) -> Result<Value, String> {
    match raw.tag {
        TAG_NONE => Ok(Value::None),
        TAG_BOOL => Ok(Value::Bool(raw.payload.i != 0)),
        TAG_INT => Ok(Value::Int(raw.payload.i)),
        TAG_FLOAT => Ok(Value::Float(raw.payload.f)),
        TAG_STR => opt_string(raw.payload.s)
            .map(Value::Str)
            .ok_or_else(|| "null string".to_string()),
        tag => Err(format!("unknown value tag {tag}")),
    }
}

/// Calls a method table entry of a loaded module.
pub(crate) fn call(entry: RawFn) -> Result<Value, String> {
    // SAFETY: entries only come from descriptors validated by `open`, whose
    // library is kept alive by the owning module.
    unsafe { value_from_raw(entry()) }
}

pub(crate) fn has_symbol(library: &Library, symbol: &str) -> bool {
    // SAFETY: the symbol is looked up only; it is never called or read.
    unsafe { library.get::<*const c_void>(symbol.as_bytes()) }.is_ok()
}

/// Loads the artifact at `path` as the module of `identity`.
pub(crate) fn open(path: &Path, identity: &UnitIdentity, role: Role) -> Result<Module, ImportError> {
    let module = identity.module_path.clone();
    let invalid = |reason: String| ImportError::Init {
        module: module.clone(),
        reason,
    };

    // SAFETY: loading runs the artifact's initializers; the artifact was
    // built by this loader from the unit being imported.
    let library = unsafe { Library::new(path) }.map_err(|source| ImportError::Load {
        module: module.clone(),
        path: path.to_path_buf(),
        source,
    })?;

    let symbol = identity.init_symbol();
    // SAFETY: `cload.h` declares the init symbol with the `InitFn` signature.
    let init = unsafe { library.get::<InitFn>(symbol.as_bytes()).map(|s| *s) }
        .map_err(|e| invalid(format!("missing init symbol {symbol}: {e}")))?;
    // SAFETY: as above; the function takes no arguments and has no
    // preconditions.
    let descriptor = unsafe { init() };
    if descriptor.is_null() {
        return Err(invalid(format!("{symbol} returned no descriptor")));
    }
    // SAFETY: a non-null descriptor points to static data of the library.
    let descriptor = unsafe { &*descriptor };
    if descriptor.abi_version != ABI_VERSION {
        return Err(invalid(format!(
            "ABI version {} (expected {ABI_VERSION})",
            descriptor.abi_version
        )));
    }
    // SAFETY: descriptor strings are static NUL-terminated literals.
    let qname = unsafe { opt_string(descriptor.qname) };
    if qname.as_deref() != Some(module.as_str()) {
        return Err(invalid(format!("descriptor names module {qname:?}")));
    }
    // SAFETY: as above.
    let doc = unsafe { opt_string(descriptor.doc) };

    if descriptor.count > 0 && descriptor.methods.is_null() {
        return Err(invalid("method table is missing".to_string()));
    }
    let mut functions = Vec::with_capacity(descriptor.count);
    for i in 0..descriptor.count {
        // SAFETY: `methods` points to `count` static entries.
        let method = unsafe { &*descriptor.methods.add(i) };
        // SAFETY: method names and docs are static literals.
        let (name, doc) = unsafe { (opt_string(method.name), opt_string(method.doc)) };
        let name = name.ok_or_else(|| invalid(format!("method {i} has no name")))?;
        let entry = method
            .func
            .ok_or_else(|| invalid(format!("method '{name}' has no function")))?;
        functions.push(Function::new(name, doc, entry));
    }

    if role.is_test() {
        install_injector(&library, &module);
    }

    log::debug!(
        "loaded {module} from {} ({} functions)",
        path.display(),
        functions.len()
    );
    Ok(Module::native(
        module,
        path.to_path_buf(),
        doc,
        functions,
        Arc::new(library),
    ))
}

fn install_injector(library: &Library, module: &str) {
    // SAFETY: `cload.h` declares the setter with the `SetInjectorFn`
    // signature in the test role.
    let setter = unsafe { library.get::<SetInjectorFn>(SET_INJECTOR_SYMBOL.as_bytes()).map(|s| *s) };
    match setter {
        Ok(set) => {
            // SAFETY: the trampoline matches the injector signature and only
            // reads the process-wide table, which is immutable once set.
            unsafe { set(Some(injection_trampoline)) };
        }
        Err(_) => log::debug!("{module} exports no {SET_INJECTOR_SYMBOL}"),
    }
}
