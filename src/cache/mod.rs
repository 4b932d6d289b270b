//! Generic caching layer for data persistence and stale-while-revalidate reads.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores `{data, timestamp, ttl}` records under prefixed string keys
//! - Offers fresh reads (evicting expired entries) and stale reads (never evicting)
//! - Serves cached lists immediately while a fetcher refreshes them
//! - Treats storage failures as cache misses

mod layer;
mod storage;
mod store;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheRecord, CacheSource, QueryKey, StaleRead, ViewEvent, CACHE_PREFIX};
