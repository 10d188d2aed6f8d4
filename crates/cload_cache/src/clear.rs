//! Removal of cache directories from source trees.

use std::path::{Path, PathBuf};

use crate::error::CacheError;

/// Removes every directory named `cache_dir_name` below each of `roots`.
///
/// Symbolic links are not followed. Returns the removed directories.
pub fn clear_tree(roots: &[PathBuf], cache_dir_name: &str) -> Result<Vec<PathBuf>, CacheError> {
    let mut removed = Vec::new();
    for root in roots {
        visit(root, cache_dir_name, &mut removed)?;
    }
    Ok(removed)
}

fn visit(dir: &Path, cache_dir_name: &str, removed: &mut Vec<PathBuf>) -> Result<(), CacheError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| CacheError::io(entry.path(), e))?;
        if !file_type.is_dir() {
            continue;
        }
        let path = entry.path();
        if entry.file_name() == cache_dir_name {
            std::fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
            log::info!("removed {}", path.display());
            removed.push(path);
        } else {
            visit(&path, cache_dir_name, removed)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_nested_cache_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("__cload__/a.c/debug");
        let nested = dir.path().join("pkg/sub/__cload__/b.c/test");
        std::fs::create_dir_all(&top).unwrap();
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("pkg/sub/b.c"), "int b;").unwrap();

        let mut removed = clear_tree(&[dir.path().to_path_buf()], "__cload__").unwrap();
        removed.sort();
        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("__cload__").exists());
        assert!(!dir.path().join("pkg/sub/__cload__").exists());
        assert!(dir.path().join("pkg/sub/b.c").exists());
    }

    #[test]
    fn missing_root_is_ignored() {
        let removed = clear_tree(&[PathBuf::from("/nonexistent/tree")], "__cload__").unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn files_with_cache_name_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("__cload__"), "not a dir").unwrap();
        let removed = clear_tree(&[dir.path().to_path_buf()], "__cload__").unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("__cload__").exists());
    }
}
