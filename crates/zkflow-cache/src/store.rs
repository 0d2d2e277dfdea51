use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::key::CacheKey;

struct CacheEntry {
  value: Value,
  expires_at: Instant,
}

impl CacheEntry {
  fn is_expired(&self, now: Instant) -> bool {
    now >= self.expires_at
  }
}

/// Cache statistics
#[derive(Default)]
pub struct CacheStats {
  hits: AtomicU64,
  misses: AtomicU64,
  inserts: AtomicU64,
  evictions: AtomicU64,
  expirations: AtomicU64,
}

impl CacheStats {
  pub fn hits(&self) -> u64 {
    self.hits.load(Ordering::Relaxed)
  }

  pub fn misses(&self) -> u64 {
    self.misses.load(Ordering::Relaxed)
  }

  pub fn inserts(&self) -> u64 {
    self.inserts.load(Ordering::Relaxed)
  }

  pub fn evictions(&self) -> u64 {
    self.evictions.load(Ordering::Relaxed)
  }

  pub fn expirations(&self) -> u64 {
    self.expirations.load(Ordering::Relaxed)
  }

  pub fn snapshot(&self) -> CacheStatsSnapshot {
    let hits = self.hits();
    let misses = self.misses();
    let total = hits + misses;
    CacheStatsSnapshot {
      hits,
      misses,
      inserts: self.inserts(),
      evictions: self.evictions(),
      expirations: self.expirations(),
      hit_rate: if total > 0 {
        hits as f64 / total as f64
      } else {
        0.0
      },
    }
  }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
  pub hits: u64,
  pub misses: u64,
  pub inserts: u64,
  pub evictions: u64,
  pub expirations: u64,
  pub hit_rate: f64,
}

/// In-process TTL cache bounded by entry count.
///
/// Expired entries are dropped lazily on lookup and in bulk by [`sweep`].
/// When the cache is full, an insert first sweeps expired entries and then
/// evicts the entry closest to expiry, which may still be within its TTL.
///
/// [`sweep`]: CacheStore::sweep
pub struct CacheStore {
  max_entries: usize,
  default_ttl: Duration,
  entries: RwLock<HashMap<CacheKey, CacheEntry>>,
  stats: CacheStats,
}

impl CacheStore {
  pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
    Self {
      max_entries: max_entries.max(1),
      default_ttl,
      entries: RwLock::new(HashMap::new()),
      stats: CacheStats::default(),
    }
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Look up a live entry. An expired hit is removed and counted as a miss.
  pub fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
    let now = Instant::now();

    // Try read lock first
    {
      let entries = self.entries.read().map_err(poisoned)?;
      match entries.get(key) {
        Some(entry) if !entry.is_expired(now) => {
          self.stats.hits.fetch_add(1, Ordering::Relaxed);
          return Ok(Some(entry.value.clone()));
        }
        Some(_) => {}
        None => {
          self.stats.misses.fetch_add(1, Ordering::Relaxed);
          return Ok(None);
        }
      }
    }

    let mut entries = self.entries.write().map_err(poisoned)?;
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
      entries.remove(key);
      self.stats.expirations.fetch_add(1, Ordering::Relaxed);
      debug!(key = %key, "cache_entry_expired");
    }
    self.stats.misses.fetch_add(1, Ordering::Relaxed);
    Ok(None)
  }

  /// Store a value for `ttl`. A zero TTL stores nothing.
  pub fn put(&self, key: CacheKey, value: Value, ttl: Duration) -> Result<(), CacheError> {
    if ttl.is_zero() {
      return Ok(());
    }

    let now = Instant::now();
    let mut entries = self.entries.write().map_err(poisoned)?;

    if entries.len() >= self.max_entries && !entries.contains_key(&key) {
      self.remove_expired(&mut entries, now);
      if entries.len() >= self.max_entries {
        self.evict_soonest_expiring(&mut entries);
      }
    }

    entries.insert(
      key,
      CacheEntry {
        value,
        expires_at: now + ttl,
      },
    );
    self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  /// Remove a single entry.
  pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
    let mut entries = self.entries.write().map_err(poisoned)?;
    Ok(entries.remove(key).is_some())
  }

  /// Remove every expired entry. Returns how many were removed.
  pub fn sweep(&self) -> Result<usize, CacheError> {
    let mut entries = self.entries.write().map_err(poisoned)?;
    Ok(self.remove_expired(&mut entries, Instant::now()))
  }

  /// Clear all entries.
  pub fn clear(&self) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.clear();
  }

  /// Number of stored entries, expired or not.
  pub fn len(&self) -> usize {
    self.entries.read().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> &CacheStats {
    &self.stats
  }

  /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
  pub fn spawn_sweeper(
    self: Arc<Self>,
    interval: Duration,
    cancel: CancellationToken,
  ) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick completes immediately.
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => match self.sweep() {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "cache_swept"),
            Err(e) => tracing::warn!(error = %e, "cache_sweep_failed"),
          },
        }
      }

      info!("cache_sweeper_stopped");
    })
  }

  fn remove_expired(&self, entries: &mut HashMap<CacheKey, CacheEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, e| !e.is_expired(now));
    let removed = before - entries.len();
    self
      .stats
      .expirations
      .fetch_add(removed as u64, Ordering::Relaxed);
    removed
  }

  fn evict_soonest_expiring(&self, entries: &mut HashMap<CacheKey, CacheEntry>) {
    if let Some(key) = entries
      .iter()
      .min_by_key(|(_, e)| e.expires_at)
      .map(|(k, _)| k.clone())
    {
      entries.remove(&key);
      self.stats.evictions.fetch_add(1, Ordering::Relaxed);
    }
  }
}

impl CacheBackend for CacheStore {
  fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
    CacheStore::get(self, key)
  }

  fn put(&self, key: CacheKey, value: Value, ttl: Duration) -> Result<(), CacheError> {
    CacheStore::put(self, key, value, ttl)
  }

  fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
    CacheStore::invalidate(self, key)
  }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> CacheError {
  CacheError::Unavailable {
    message: format!("cache lock poisoned: {}", e),
  }
}
