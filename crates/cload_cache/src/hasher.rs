//! Source fingerprinting with an mtime fast path.
//!
//! Freshness is decided by content hashes only. File metadata is consulted
//! first: when every input still has the length and modification time that
//! was recorded at the last commit, the recorded content hash is reused
//! without reading the files. Inputs modified within [`RACY_WINDOW`] of the
//! moment they were stamped are always rehashed, since a same-length rewrite
//! inside one timestamp tick would otherwise go unnoticed.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cload_common::{ContentHash, FingerprintHasher};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::record::CacheRecord;

/// Inputs whose mtime is this close to the stamp time are never trusted.
pub const RACY_WINDOW: Duration = Duration::from_secs(2);

/// A filesystem timestamp with nanosecond precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub secs: u64,
    /// Sub-second nanoseconds.
    pub nanos: u32,
}

impl Timestamp {
    /// The current time.
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Converts a `SystemTime`, clamping pre-epoch times to zero.
    pub fn from_system(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }

    fn as_duration(self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }
}

/// Length and modification time of one build input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStamp {
    /// Path of the input.
    pub path: PathBuf,
    /// Length in bytes.
    pub len: u64,
    /// Last modification time.
    pub mtime: Timestamp,
}

/// Result of fingerprinting the inputs of a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStamp {
    /// Hash over the bytes of every input, in order.
    pub content: ContentHash,
    /// Metadata of every input.
    pub inputs: Vec<InputStamp>,
    /// When the stamp was taken.
    pub stamped_at: Timestamp,
    /// `false` when the hash was reused from the prior record.
    pub rehashed: bool,
}

/// Utility for fingerprinting build inputs.
pub struct SourceHasher;

impl SourceHasher {
    /// Reads the metadata of one input.
    pub fn stamp(path: &Path) -> Result<InputStamp, CacheError> {
        let meta = std::fs::metadata(path).map_err(|e| CacheError::io(path, e))?;
        let mtime = meta.modified().map_err(|e| CacheError::io(path, e))?;
        Ok(InputStamp {
            path: path.to_path_buf(),
            len: meta.len(),
            mtime: Timestamp::from_system(mtime),
        })
    }

    /// Hashes the bytes of every input, in order.
    pub fn hash_inputs(paths: &[PathBuf]) -> Result<ContentHash, CacheError> {
        let mut hasher = FingerprintHasher::new();
        hasher.field((paths.len() as u64).to_le_bytes());
        for path in paths {
            let content = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
            hasher.field(&content);
        }
        Ok(hasher.finish())
    }

    /// Fingerprints `inputs`, reusing the content hash of `prior` when the
    /// metadata of every input is unchanged and old enough to be trusted.
    pub fn fingerprint(
        inputs: &[PathBuf],
        prior: Option<&CacheRecord>,
    ) -> Result<SourceStamp, CacheError> {
        let stamped_at = Timestamp::now();
        let stamps = inputs
            .iter()
            .map(|p| Self::stamp(p))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(prior) = prior {
            if Self::stamps_trusted(&stamps, prior) {
                return Ok(SourceStamp {
                    content: prior.fingerprint.content,
                    inputs: stamps,
                    stamped_at,
                    rehashed: false,
                });
            }
        }

        Ok(SourceStamp {
            content: Self::hash_inputs(inputs)?,
            inputs: stamps,
            stamped_at,
            rehashed: true,
        })
    }

    fn stamps_trusted(current: &[InputStamp], prior: &CacheRecord) -> bool {
        let horizon = prior.stamped_at.as_duration();
        current.len() == prior.inputs.len()
            && current.iter().zip(&prior.inputs).all(|(now, then)| {
                now == then && now.mtime.as_duration() + RACY_WINDOW <= horizon
            })
    }
}
