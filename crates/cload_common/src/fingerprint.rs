//! Fingerprints and build-attempt identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::hash::{ContentHash, FingerprintHasher};
use crate::unit::UnitIdentity;

/// The pair of hashes that decides whether a cached artifact is valid.
///
/// A cache entry is fresh if and only if its stored fingerprint equals the
/// fingerprint computed for the current import attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hash of the source bytes (and sidecar bytes, when present).
    pub content: ContentHash,
    /// Hash of compiler identity, flags, role and role options.
    pub toolchain: ContentHash,
}

impl Fingerprint {
    /// Combines the fingerprint with a unit identity into the cache key that
    /// names the committed artifact.
    pub fn cache_key(&self, identity: &UnitIdentity) -> ContentHash {
        FingerprintHasher::new()
            .hash(&identity.key())
            .hash(&self.content)
            .hash(&self.toolchain)
            .finish()
    }
}

static ATTEMPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identifier of one build attempt, unique within the machine for practical
/// purposes: `<unix-millis>-<pid>-<seq>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(String);

impl AttemptId {
    /// Allocates a new attempt identifier.
    pub fn next() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = ATTEMPT_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{millis}-{}-{seq}", std::process::id()))
    }

    /// Wraps an existing identifier (e.g. one parsed from a transcript).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
