//! The per-unit cache record and its framed on-disk encoding.
//!
//! A record is stored as `record.bin` in the unit's role directory. It is
//! prefixed by a header with magic bytes, a format version, and a checksum of
//! the payload so that truncated or foreign files read as a cache miss.

use std::path::Path;

use cload_common::{AttemptId, ContentHash, Fingerprint, Role, UnitIdentity};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::hasher::{InputStamp, Timestamp};

/// Magic bytes identifying a cload cache record.
const RECORD_MAGIC: [u8; 4] = *b"CLOD";

/// Current record format version. Increment on breaking changes to the
/// header or payload layout.
const RECORD_FORMAT_VERSION: u32 = 1;

/// Version of this crate, stored in every record.
pub const CLOAD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header prepended to every record for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: ContentHash,
}

/// Everything the cache knows about the last successful build of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Version of cload that committed the record.
    pub cload_version: String,
    /// Identity of the unit the record belongs to.
    pub identity: UnitIdentity,
    /// Role the artifact was compiled for.
    pub role: Role,
    /// Fingerprint the artifact was built from.
    pub fingerprint: Fingerprint,
    /// Metadata of every build input at the time it was hashed.
    pub inputs: Vec<InputStamp>,
    /// When the inputs were hashed.
    pub stamped_at: Timestamp,
    /// File name of the artifact in the `artifacts/` directory.
    pub artifact: String,
    /// Hash of the artifact bytes.
    pub artifact_hash: ContentHash,
    /// Length of the artifact in bytes.
    pub artifact_len: u64,
    /// Build attempt that produced the artifact.
    pub attempt: AttemptId,
}

impl CacheRecord {
    /// Encodes the record with its validation header.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);
        Ok(output)
    }

    /// Decodes a record, returning `None` for any validation failure.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }
        let header: RecordHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?
                .0;
        if header.magic != RECORD_MAGIC || header.format_version != RECORD_FORMAT_VERSION {
            return None;
        }
        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }
        let record: CacheRecord =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .ok()?
                .0;
        Some(record)
    }

    /// Reads a record from disk. Missing, unreadable, corrupt, or
    /// version-incompatible records all read as `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("ignoring unreadable cache record {}: {e}", path.display());
                return None;
            }
        };
        let record = Self::decode(&raw);
        match &record {
            None => log::warn!("ignoring corrupt cache record {}", path.display()),
            Some(r) if r.cload_version != CLOAD_VERSION => {
                log::debug!(
                    "ignoring cache record {} from cload {}",
                    path.display(),
                    r.cload_version
                );
                return None;
            }
            Some(_) => {}
        }
        record
    }

    /// Writes the record atomically: the bytes go to `tmp_path` first and
    /// are then renamed over `path`.
    pub fn store(&self, path: &Path, tmp_path: &Path) -> Result<(), CacheError> {
        let bytes = self.encode()?;
        std::fs::write(tmp_path, &bytes).map_err(|e| CacheError::io(tmp_path, e))?;
        std::fs::rename(tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(tmp_path);
            CacheError::io(path, e)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cload_common::SourceLanguage;
    use std::path::PathBuf;

    pub(crate) fn sample_record() -> CacheRecord {
        CacheRecord {
            cload_version: CLOAD_VERSION.to_string(),
            identity: UnitIdentity::new(
                "pkg.fixture",
                PathBuf::from("/src/pkg/fixture.c"),
                SourceLanguage::C,
            ),
            role: Role::Debug,
            fingerprint: Fingerprint {
                content: ContentHash::from_bytes(b"int x;"),
                toolchain: ContentHash::from_bytes(b"cc -O0"),
            },
            inputs: vec![],
            stamped_at: Timestamp { secs: 10, nanos: 5 },
            artifact: "fixture-0011223344556677.so".to_string(),
            artifact_hash: ContentHash::from_bytes(b"elf"),
            artifact_len: 3,
            attempt: AttemptId::from_raw("1-2-3"),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = sample_record();
        let bytes = record.encode().unwrap();
        assert_eq!(CacheRecord::decode(&bytes), Some(record));
    }

    #[test]
    fn decode_garbage_returns_none() {
        assert!(CacheRecord::decode(b"garbage data").is_none());
        assert!(CacheRecord::decode(b"AB").is_none());
    }

    #[test]
    fn decode_tampered_payload_returns_none() {
        let mut bytes = sample_record().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(CacheRecord::decode(&bytes).is_none());
    }

    #[test]
    fn decode_truncated_returns_none() {
        let bytes = sample_record().encode().unwrap();
        assert!(CacheRecord::decode(&bytes[..bytes.len() / 2]).is_none());
    }

    #[test]
    fn store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.bin");
        let tmp = dir.path().join("record.bin.tmp");
        let record = sample_record();
        record.store(&path, &tmp).unwrap();
        assert!(!tmp.exists());
        assert_eq!(CacheRecord::load(&path), Some(record));
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheRecord::load(&dir.path().join("record.bin")).is_none());
    }

    #[test]
    fn load_other_version_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.bin");
        let mut record = sample_record();
        record.cload_version = "0.0.0-old".to_string();
        record.store(&path, &dir.path().join("t")).unwrap();
        assert!(CacheRecord::load(&path).is_none());
    }
}
