//! TTL cache over a [`CacheStorage`] backend.
//!
//! Every operation is infallible from the caller's point of view: storage and
//! serialization errors are logged and degrade to a miss or a no-op, so a
//! broken cache behaves like an always-cold one.

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheRecord, QueryKey, StaleRead, CACHE_PREFIX};
use crate::clock::Clock;

/// Shared handle to the per-user cache.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn CacheStorage>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  /// Write `data` under `key`, replacing whatever was there.
  pub fn set<K, T>(&self, key: &K, data: &T, ttl: Duration)
  where
    K: QueryKey + ?Sized,
    T: Serialize + ?Sized,
  {
    let record = CacheRecord::new(data, self.clock.now(), ttl);
    let result = serde_json::to_string(&record)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize cache entry: {}", e))
      .and_then(|raw| self.storage.put(&key.storage_key(), &raw));

    if let Err(e) = result {
      warn!(key = %key.description(), "Cache write failed: {}", e);
    }
  }

  /// Read `key` only if it is still within its TTL. Expired entries are evicted.
  pub fn get_fresh<K, T>(&self, key: &K) -> Option<T>
  where
    K: QueryKey + ?Sized,
    T: DeserializeOwned,
  {
    let storage_key = key.storage_key();
    let record: CacheRecord<T> = self.read(key, &storage_key)?;

    if record.is_expired(self.clock.now()) {
      debug!(key = %key.description(), "Evicting expired cache entry");
      self.remove(key, &storage_key);
      return None;
    }

    Some(record.data)
  }

  /// Read `key` regardless of age. Never evicts.
  pub fn get_stale<K, T>(&self, key: &K) -> StaleRead<T>
  where
    K: QueryKey + ?Sized,
    T: DeserializeOwned,
  {
    match self.read::<K, T>(key, &key.storage_key()) {
      Some(record) => StaleRead {
        is_stale: record.is_expired(self.clock.now()),
        data: Some(record.data),
      },
      None => StaleRead::miss(),
    }
  }

  /// Remove exactly one entry. Missing keys are fine.
  pub fn invalidate<K: QueryKey + ?Sized>(&self, key: &K) {
    self.remove(key, &key.storage_key());
  }

  /// Remove every entry whose key starts with `prefix`'s key.
  pub fn invalidate_prefix<K: QueryKey + ?Sized>(&self, prefix: &K) {
    match self.storage.remove_prefix(&prefix.storage_key()) {
      Ok(count) => debug!(prefix = %prefix.description(), count, "Invalidated cache prefix"),
      Err(e) => warn!(prefix = %prefix.description(), "Prefix invalidate failed: {}", e),
    }
  }

  /// Drop every entry this crate has written.
  pub fn clear(&self) {
    if let Err(e) = self.storage.remove_prefix(CACHE_PREFIX) {
      warn!("Cache clear failed: {}", e);
    }
  }

  fn read<K, T>(&self, key: &K, storage_key: &str) -> Option<CacheRecord<T>>
  where
    K: QueryKey + ?Sized,
    T: DeserializeOwned,
  {
    let raw = match self.storage.get(storage_key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key = %key.description(), "Cache read failed: {}", e);
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(key = %key.description(), "Unreadable cache entry: {}", e);
        None
      }
    }
  }

  fn remove<K: QueryKey + ?Sized>(&self, key: &K, storage_key: &str) {
    if let Err(e) = self.storage.remove(storage_key) {
      warn!(key = %key.description(), "Cache invalidate failed: {}", e);
    }
  }
}
