//! zkflow Digest
//!
//! Canonical JSON serialization and SHA-256 digests. Every content address in
//! zkflow (cache keys, policy hashes, proof fingerprints) is produced here so
//! that semantically identical JSON always hashes the same way, regardless of
//! object key order.

mod canonical;
mod digest;

pub use canonical::{canonical_bytes, canonical_string};
pub use digest::{Digest, DigestBuilder, DigestError};
