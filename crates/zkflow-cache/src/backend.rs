use std::time::Duration;

use serde_json::Value;

use crate::error::CacheError;
use crate::key::CacheKey;

/// Storage seam for cached step outputs.
///
/// Implementations must be safe to share across concurrent workflow runs.
pub trait CacheBackend: Send + Sync {
  fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError>;

  fn put(&self, key: CacheKey, value: Value, ttl: Duration) -> Result<(), CacheError>;

  /// Drop an entry. Returns whether it was present.
  fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError>;
}
