//! Shared foundational types for the cload extension loader.
//!
//! This crate provides content hashing, compilation roles, source-unit
//! identities, and fingerprints.

#![warn(missing_docs)]

pub mod fingerprint;
pub mod hash;
pub mod role;
pub mod unit;

pub use fingerprint::{AttemptId, Fingerprint};
pub use hash::{ContentHash, FingerprintHasher};
pub use role::{ParseRoleError, Role};
pub use unit::{SourceLanguage, SourceUnit, UnitIdentity};
