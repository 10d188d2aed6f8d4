//! Intra-process build serialization.
//!
//! At most one build per unit identity proceeds at a time within a process.
//! Across processes builds may race; the atomic commit makes the last
//! successful build win without corrupting the cache.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use cload_common::ContentHash;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Table of per-identity build locks.
#[derive(Default)]
pub struct BuildLocks {
    slots: Mutex<HashMap<ContentHash, Arc<Mutex<()>>>>,
}

/// Holds the build lock for one identity until dropped.
pub struct BuildGuard<'a> {
    locks: &'a BuildLocks,
    key: ContentHash,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl BuildLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock table.
    pub fn global() -> &'static BuildLocks {
        static GLOBAL: OnceLock<BuildLocks> = OnceLock::new();
        GLOBAL.get_or_init(BuildLocks::new)
    }

    /// Blocks until the lock for `key` is held by the caller.
    pub fn lock(&self, key: ContentHash) -> BuildGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key).or_default())
        };
        let guard = slot.lock_arc();
        BuildGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of identities with a live lock slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` when no lock slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock();
        if let Some(slot) = slots.get(&self.key) {
            // Only the table's own reference remains: nobody holds or waits.
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn slot_removed_after_release() {
        let locks = BuildLocks::new();
        let key = ContentHash::from_bytes(b"unit");
        {
            let _guard = locks.lock(key);
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn distinct_keys_do_not_block() {
        let locks = BuildLocks::new();
        let _a = locks.lock(ContentHash::from_bytes(b"a"));
        let _b = locks.lock(ContentHash::from_bytes(b"b"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(BuildLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let key = ContentHash::from_bytes(b"shared");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    let _guard = locks.lock(key);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
