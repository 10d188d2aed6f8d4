//! Per-unit cache directory: lookup, temporary workspaces, atomic commit.
//!
//! Each unit owns one directory per role, colocated with its source. A file
//! reachable under several module paths (overlapping search roots) gets one
//! directory per module path, so records and artifacts are never shared
//! between identities:
//!
//! ```text
//! <source dir>/__cload__/<source file>/<module path>/<role>/
//!     record.bin          fingerprint record of the last successful build
//!     artifacts/          committed artifacts, one file name per cache key
//!     work/<attempt>/     temporary build workspaces
//!     transcript.log      every build attempt, successful or not
//! ```
//!
//! A build happens entirely inside a workspace. Committing first renames the
//! linked artifact into `artifacts/` under a name derived from the cache key,
//! then replaces `record.bin` through a rename. The record rename is the
//! commit point: until it happens, readers keep seeing the previous entry,
//! and an interrupted build leaves nothing but an orphaned workspace, which
//! lookups never consult.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use cload_common::{AttemptId, ContentHash, Fingerprint, Role, UnitIdentity};

use crate::error::CacheError;
use crate::hasher::{SourceHasher, SourceStamp};
use crate::record::{CacheRecord, CLOAD_VERSION};
use crate::transcript::{TranscriptLog, TranscriptRef};

const RECORD_FILE: &str = "record.bin";
const ARTIFACT_SUBDIR: &str = "artifacts";
const WORK_SUBDIR: &str = "work";
const TRANSCRIPT_FILE: &str = "transcript.log";

/// A committed, verified cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// The record describing the build.
    pub record: CacheRecord,
    /// Absolute path of the committed artifact.
    pub artifact_path: PathBuf,
    /// Path of the unit's transcript log.
    pub transcript_path: PathBuf,
}

/// Outcome of a cache lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The stored fingerprint matches and the artifact is intact.
    Fresh(CacheEntry),
    /// A record exists for this unit and role but cannot be used.
    Stale(CacheRecord),
    /// No usable record exists.
    Absent,
}

/// Temporary directory for one build attempt, removed when dropped.
pub struct Workspace {
    dir: PathBuf,
    attempt: AttemptId,
}

impl Workspace {
    /// Directory holding the intermediate files of the attempt.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The attempt this workspace belongs to.
    pub fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove workspace {}: {e}", self.dir.display());
            }
        }
    }
}

/// Cache manager for one unit under one role.
pub struct UnitCache {
    identity: UnitIdentity,
    role: Role,
    root: PathBuf,
    transcript: TranscriptLog,
}

impl UnitCache {
    /// Opens the cache directory of `identity` under `role`. Nothing is
    /// created on disk until a build starts.
    pub fn open(
        identity: UnitIdentity,
        role: Role,
        cache_dir_name: &str,
        transcript_retain: usize,
    ) -> Self {
        let root = identity
            .source_dir()
            .join(cache_dir_name)
            .join(identity.source_file_name())
            .join(&identity.module_path)
            .join(role.as_str());
        let transcript = TranscriptLog::new(root.join(TRANSCRIPT_FILE), transcript_retain);
        Self {
            identity,
            role,
            root,
            transcript,
        }
    }

    /// The unit's identity.
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// The role this cache belongs to.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Root directory of this unit and role.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the fingerprint record.
    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Directory holding committed artifacts.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACT_SUBDIR)
    }

    /// The unit's transcript log.
    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    /// Loads the record, ignoring records that belong to another unit or
    /// role (e.g. a cache directory copied alongside a moved source).
    pub fn load_record(&self) -> Option<CacheRecord> {
        let record = CacheRecord::load(&self.record_path())?;
        if record.identity != self.identity || record.role != self.role {
            log::debug!(
                "ignoring record for {} ({}) in {}",
                record.identity.module_path,
                record.role,
                self.root.display()
            );
            return None;
        }
        Some(record)
    }

    /// Computes the content fingerprint of `inputs`, using the metadata
    /// recorded at the last commit as a fast path.
    pub fn content_fingerprint(&self, inputs: &[PathBuf]) -> Result<SourceStamp, CacheError> {
        let prior = self.load_record();
        SourceHasher::fingerprint(inputs, prior.as_ref())
    }

    /// Classifies the cache state against `fingerprint`.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Lookup {
        let Some(record) = self.load_record() else {
            return Lookup::Absent;
        };
        if record.fingerprint != *fingerprint {
            log::debug!(
                "{}: fingerprint changed, cache entry is stale",
                self.identity.module_path
            );
            return Lookup::Stale(record);
        }
        match self.verify(record) {
            Ok(entry) => Lookup::Fresh(entry),
            Err(record) => Lookup::Stale(record),
        }
    }

    /// Finds an intact entry whose content hash matches, whatever toolchain
    /// built it. Used when no toolchain is available to fingerprint.
    pub fn lookup_content_only(&self, content: &ContentHash) -> Option<CacheEntry> {
        let record = self.load_record()?;
        if record.fingerprint.content != *content {
            return None;
        }
        self.verify(record).ok()
    }

    fn verify(&self, record: CacheRecord) -> Result<CacheEntry, CacheRecord> {
        let artifact_path = self.artifacts_dir().join(&record.artifact);
        let intact = std::fs::read(&artifact_path)
            .map(|bytes| {
                bytes.len() as u64 == record.artifact_len
                    && ContentHash::from_bytes(&bytes) == record.artifact_hash
            })
            .unwrap_or(false);
        if !intact {
            log::warn!(
                "cached artifact {} is missing or damaged",
                artifact_path.display()
            );
            return Err(record);
        }
        Ok(CacheEntry {
            record,
            artifact_path,
            transcript_path: self.transcript.path().to_path_buf(),
        })
    }

    /// Creates the temporary workspace for `attempt`.
    pub fn begin_build(&self, attempt: &AttemptId) -> Result<Workspace, CacheError> {
        let dir = self.root.join(WORK_SUBDIR).join(attempt.as_str());
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Workspace {
            dir,
            attempt: attempt.clone(),
        })
    }

    /// Publishes `built` as the artifact for `fingerprint`.
    ///
    /// The artifact is moved out of its workspace into `artifacts/`, then
    /// the record is replaced atomically. On error the previous record is
    /// left in place.
    pub fn commit(
        &self,
        fingerprint: Fingerprint,
        stamp: &SourceStamp,
        built: &Path,
        transcript: &TranscriptRef,
    ) -> Result<CacheEntry, CacheError> {
        let bytes = match std::fs::read(built) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::MissingArtifact {
                    path: built.to_path_buf(),
                })
            }
            Err(e) => return Err(CacheError::io(built, e)),
        };

        let artifacts = self.artifacts_dir();
        std::fs::create_dir_all(&artifacts).map_err(|e| CacheError::io(&artifacts, e))?;
        let key = fingerprint.cache_key(&self.identity);
        let name = match built.extension() {
            Some(ext) => format!(
                "{}-{}.{}",
                self.identity.basename(),
                key.short(),
                ext.to_string_lossy()
            ),
            None => format!("{}-{}", self.identity.basename(), key.short()),
        };
        let artifact_path = artifacts.join(&name);
        std::fs::rename(built, &artifact_path).map_err(|e| CacheError::io(&artifact_path, e))?;

        let record = CacheRecord {
            cload_version: CLOAD_VERSION.to_string(),
            identity: self.identity.clone(),
            role: self.role,
            fingerprint,
            inputs: stamp.inputs.clone(),
            stamped_at: stamp.stamped_at,
            artifact: name,
            artifact_hash: ContentHash::from_bytes(&bytes),
            artifact_len: bytes.len() as u64,
            attempt: transcript.attempt.clone(),
        };
        let tmp = self
            .root
            .join(format!("{RECORD_FILE}.{}.tmp", transcript.attempt));
        record.store(&self.record_path(), &tmp)?;
        log::debug!(
            "{}: committed {} ({})",
            self.identity.module_path,
            artifact_path.display(),
            self.role
        );

        Ok(CacheEntry {
            record,
            artifact_path,
            transcript_path: self.transcript.path().to_path_buf(),
        })
    }

    /// Removes artifacts not referenced by the current record. Returns the
    /// number of files removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let live = self.load_record().map(|r| r.artifact);
        let dir = self.artifacts_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.as_deref() == Some(name.as_str()) {
                continue;
            }
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }
        if removed > 0 {
            log::debug!("{}: removed {removed} old artifacts", self.identity.module_path);
        }
        Ok(removed)
    }

    /// Removes workspaces and record temporaries left behind by interrupted
    /// builds, once they are older than `max_age`. Returns the number of
    /// entries removed.
    pub fn purge_stale_workspaces(&self, max_age: Duration) -> Result<usize, CacheError> {
        let now = SystemTime::now();
        let is_old = |path: &Path| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|t| now.duration_since(t).unwrap_or_default() >= max_age)
                .unwrap_or(false)
        };

        let mut removed = 0;
        let work = self.root.join(WORK_SUBDIR);
        if let Ok(entries) = std::fs::read_dir(&work) {
            for entry in entries.flatten() {
                let path = entry.path();
                if is_old(&path) {
                    std::fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
                    removed += 1;
                }
            }
        }
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_tmp = path.extension().is_some_and(|ext| ext == "tmp");
                if is_tmp && path.is_file() && is_old(&path) {
                    std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            log::info!(
                "{}: purged {removed} abandoned build files",
                self.identity.module_path
            );
        }
        Ok(removed)
    }
}
