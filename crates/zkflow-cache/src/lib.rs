//! zkflow Cache
//!
//! Content-addressed cache for expensive step outputs (generated proofs,
//! verification outcomes). Entries are keyed by a [`CacheKey`] derived from
//! the circuit, the operation, the canonical inputs and the policy hash, so
//! identical work always lands on the same entry.
//!
//! [`CacheStore`] is the in-process implementation. Callers that talk to
//! the cache through [`CacheBackend`] treat every [`CacheError`] as a miss.

mod backend;
mod error;
mod key;
mod store;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use store::{CacheStats, CacheStatsSnapshot, CacheStore};
