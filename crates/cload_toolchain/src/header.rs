//! The bundled `cload.h` extension header.

use std::path::{Path, PathBuf};

use cload_common::ContentHash;

use crate::error::InvokeError;

/// File name of the header inside a build workspace.
pub const HEADER_NAME: &str = "cload.h";

/// Text of the header force-included into every unit.
pub const HEADER: &str = include_str!("../include/cload.h");

/// Hash of the header text; part of every toolchain fingerprint.
pub fn header_hash() -> ContentHash {
    ContentHash::from_bytes(HEADER.as_bytes())
}

/// Writes the header into `dir` and returns its path.
pub fn materialize(dir: &Path) -> Result<PathBuf, InvokeError> {
    let path = dir.join(HEADER_NAME);
    std::fs::write(&path, HEADER).map_err(|e| InvokeError::io(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_declares_abi() {
        assert!(HEADER.contains("CLOAD_ABI_VERSION"));
        assert!(HEADER.contains("INIT_FUNCTION"));
        assert!(HEADER.contains("cload_set_injector"));
    }

    #[test]
    fn injector_is_gated_on_test_role() {
        let gate = HEADER.find("#if CLOAD_ROLE_TEST").unwrap();
        let hook = HEADER.find("cload_set_injector(cload_injector").unwrap();
        assert!(gate < hook);
    }

    #[test]
    fn materialize_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = materialize(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), HEADER);
    }
}
