//! Per-unit transcript log of build attempts.
//!
//! Every build attempt, successful or not, appends one entry holding the
//! command lines and the combined output of the toolchain. The log is kept
//! independent of cache validity so failures can be inspected after the
//! fact. Older attempts are rotated out once more than `retain` entries
//! exist; the most recent attempt is always retained.
//!
//! Recorded lines that would read as an entry header are escaped with a
//! leading backslash, and one backslash is removed again when reading, so
//! tool output can never split an entry. Rotation only replaces the log
//! when nothing was appended to it since it was read.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use cload_common::AttemptId;

use crate::error::CacheError;

const ENTRY_PREFIX: &str = "##### cload attempt ";
const ENTRY_SUFFIX: &str = " #####";
const ESCAPE: char = '\\';

/// Reference to one attempt inside a transcript log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptRef {
    /// Path of the transcript log.
    pub path: PathBuf,
    /// Attempt recorded in the log.
    pub attempt: AttemptId,
}

impl fmt::Display for TranscriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.attempt)
    }
}

/// One attempt read back from a transcript log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// The attempt identifier.
    pub attempt: AttemptId,
    /// The recorded text.
    pub text: String,
}

/// Append-only transcript log for one unit.
pub struct TranscriptLog {
    path: PathBuf,
    retain: usize,
}

impl TranscriptLog {
    /// Opens (lazily) the log at `path`, keeping at most `retain` attempts.
    pub fn new(path: impl Into<PathBuf>, retain: usize) -> Self {
        Self {
            path: path.into(),
            retain: retain.max(1),
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the text of one attempt and rotates old attempts out.
    pub fn record(&self, attempt: &AttemptId, text: &str) -> Result<TranscriptRef, CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CacheError::io(&self.path, e))?;

        let mut entry = format!("{ENTRY_PREFIX}{attempt}{ENTRY_SUFFIX}\n");
        for line in text.split_inclusive('\n') {
            if is_escaped_header(line) {
                entry.push(ESCAPE);
            }
            entry.push_str(line);
        }
        if !entry.ends_with('\n') {
            entry.push('\n');
        }
        file.write_all(entry.as_bytes())
            .map_err(|e| CacheError::io(&self.path, e))?;
        drop(file);

        self.rotate()?;
        Ok(TranscriptRef {
            path: self.path.clone(),
            attempt: attempt.clone(),
        })
    }

    /// Returns the most recent attempt, if any was recorded.
    pub fn read(&self) -> Result<Option<TranscriptEntry>, CacheError> {
        Ok(self.read_all()?.pop())
    }

    /// Returns the recorded text of a specific attempt.
    pub fn read_attempt(&self, attempt: &AttemptId) -> Result<Option<String>, CacheError> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|e| &e.attempt == attempt)
            .map(|e| e.text))
    }

    /// Returns every retained attempt, oldest first.
    pub fn read_all(&self) -> Result<Vec<TranscriptEntry>, CacheError> {
        let Some(raw) = self.read_raw()? else {
            return Ok(Vec::new());
        };
        Ok(split_entries(&raw)
            .into_iter()
            .map(|(attempt, body)| TranscriptEntry {
                attempt: AttemptId::from_raw(attempt),
                text: unescape(body),
            })
            .collect())
    }

    fn read_raw(&self) -> Result<Option<String>, CacheError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&self.path, e)),
        }
    }

    fn rotate(&self) -> Result<(), CacheError> {
        let raw = std::fs::read(&self.path).map_err(|e| CacheError::io(&self.path, e))?;
        let content = String::from_utf8_lossy(&raw);
        let entries = split_entries(&content);
        if entries.len() <= self.retain {
            return Ok(());
        }
        let keep = &entries[entries.len() - self.retain..];
        let mut rotated = String::new();
        for (attempt, body) in keep {
            rotated.push_str(ENTRY_PREFIX);
            rotated.push_str(attempt);
            rotated.push_str(ENTRY_SUFFIX);
            rotated.push('\n');
            rotated.push_str(body);
        }
        let tmp = self
            .path
            .with_extension(format!("log.{}.tmp", std::process::id()));
        std::fs::write(&tmp, rotated).map_err(|e| CacheError::io(&tmp, e))?;

        // Another process appended meanwhile; leave rotation to the next
        // record rather than drop its entry.
        let len = std::fs::metadata(&self.path)
            .map_err(|e| CacheError::io(&self.path, e))?
            .len();
        if len != raw.len() as u64 {
            log::debug!(
                "transcript {} grew during rotation, keeping it whole",
                self.path.display()
            );
            std::fs::remove_file(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
            return Ok(());
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| CacheError::io(&self.path, e))?;
        log::debug!(
            "rotated transcript {} to {} attempts",
            self.path.display(),
            keep.len()
        );
        Ok(())
    }
}

fn parse_header(line: &str) -> Option<&str> {
    line.trim_end_matches(['\n', '\r'])
        .strip_prefix(ENTRY_PREFIX)?
        .strip_suffix(ENTRY_SUFFIX)
}

/// A header line behind any number of escapes, including none.
fn is_escaped_header(line: &str) -> bool {
    parse_header(line.trim_start_matches(ESCAPE)).is_some()
}

/// Splits raw log content into `(attempt, escaped body)` pairs.
fn split_entries(content: &str) -> Vec<(&str, String)> {
    let mut entries: Vec<(&str, String)> = Vec::new();
    for line in content.split_inclusive('\n') {
        if let Some(id) = parse_header(line) {
            entries.push((id, String::new()));
        } else if let Some((_, body)) = entries.last_mut() {
            body.push_str(line);
        }
    }
    entries
}

fn unescape(body: String) -> String {
    if !body.contains(ESCAPE) {
        return body;
    }
    let mut text = String::with_capacity(body.len());
    for line in body.split_inclusive('\n') {
        match line.strip_prefix(ESCAPE) {
            Some(rest) if is_escaped_header(rest) => text.push_str(rest),
            _ => text.push_str(line),
        }
    }
    text
}
