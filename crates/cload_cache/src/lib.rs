//! On-disk build cache for compiled extensions.
//!
//! This crate maps a source unit and its fingerprint to a committed artifact
//! stored next to the source, decides freshness, commits new builds
//! atomically, serializes builds of one unit within a process, and keeps the
//! per-unit transcript log of every build attempt.

#![warn(missing_docs)]

pub mod clear;
pub mod error;
pub mod hasher;
pub mod locks;
pub mod record;
pub mod transcript;
pub mod unit_cache;

pub use clear::clear_tree;
pub use error::CacheError;
pub use hasher::{InputStamp, SourceHasher, SourceStamp};
pub use locks::{BuildGuard, BuildLocks};
pub use record::CacheRecord;
pub use transcript::{TranscriptEntry, TranscriptLog, TranscriptRef};
pub use unit_cache::{CacheEntry, Lookup, UnitCache, Workspace};
