//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Prefix shared by every key this crate writes to cache storage.
pub const CACHE_PREFIX: &str = "ss_cache_";

/// Anything that names a cache entry (or a family of entries).
///
/// Implementors return the key without the storage prefix; the store adds
/// [`CACHE_PREFIX`] itself.
pub trait QueryKey {
  /// Stable key string, e.g. `home_items_<society id>`.
  fn cache_key(&self) -> String;

  /// Human readable description used in log lines.
  fn description(&self) -> String;

  /// Full key as written to storage.
  fn storage_key(&self) -> String {
    format!("{}{}", CACHE_PREFIX, self.cache_key())
  }
}

/// The persisted shape of one cache entry: `{data, timestamp, ttl}`.
///
/// `timestamp` and `ttl` are milliseconds (unix epoch and duration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord<T> {
  pub data: T,
  pub timestamp: i64,
  pub ttl: i64,
}

impl<T> CacheRecord<T> {
  pub fn new(data: T, written_at: DateTime<Utc>, ttl: Duration) -> Self {
    Self {
      data,
      timestamp: written_at.timestamp_millis(),
      ttl: ttl.num_milliseconds(),
    }
  }

  /// An entry is expired once strictly more than `ttl` has elapsed.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now.timestamp_millis() - self.timestamp > self.ttl
  }
}

/// Result of a stale-tolerant read.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead<T> {
  /// The cached value, `None` only when nothing is stored under the key
  pub data: Option<T>,
  /// Whether the value has outlived its TTL
  pub is_stale: bool,
}

impl<T> StaleRead<T> {
  pub fn miss() -> Self {
    Self {
      data: None,
      is_stale: false,
    }
  }
}

/// Indicates where data delivered to a view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the data store
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Data from cache past its TTL, revalidation in progress
  CacheStale,
}

/// Update pushed to a screen while its data dependency loads.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent<T> {
  /// Nothing to show yet, the view should render its skeleton
  Loading,
  /// Data to render
  Loaded { data: T, source: CacheSource },
  /// A blocking load failed; the view leaves its loading state
  Failed(String),
}
