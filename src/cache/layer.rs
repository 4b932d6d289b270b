//! Stale-while-revalidate coordination between the cache and a data fetcher.

use chrono::Duration;
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::store::CacheStore;
use super::traits::{CacheSource, QueryKey, ViewEvent};

/// Cache layer that serves cached lists immediately and refreshes them behind
/// the view's back.
#[derive(Clone)]
pub struct CacheLayer {
  store: CacheStore,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Load a list with stale-while-revalidate semantics.
  ///
  /// 1. Unless `force` is set, read the cache regardless of age. A non-empty
  ///    hit is sent to the view right away and the fetcher runs in a
  ///    background task, whose handle is returned.
  /// 2. Otherwise the view is told it is loading and the fetcher runs inline.
  ///
  /// Either way a successful fetch is written back under `key` with `ttl`
  /// and sent to the view.
  pub async fn load_list<K, T, F, Fut>(
    &self,
    key: K,
    ttl: Duration,
    force: bool,
    fetcher: F,
    tx: &UnboundedSender<ViewEvent<Vec<T>>>,
  ) -> Option<JoinHandle<()>>
  where
    K: QueryKey + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
  {
    if !force {
      let stale = self.store.get_stale::<K, Vec<T>>(&key);
      if let Some(data) = stale.data.filter(|d| !d.is_empty()) {
        let source = if stale.is_stale {
          CacheSource::CacheStale
        } else {
          CacheSource::CacheFresh
        };
        debug!(key = %key.description(), ?source, "Serving cached list");
        let _ = tx.send(ViewEvent::Loaded { data, source });

        let store = self.store.clone();
        let tx = tx.clone();
        return Some(tokio::spawn(async move {
          revalidate(&store, &key, ttl, fetcher, &tx, true).await;
        }));
      }
    }

    let _ = tx.send(ViewEvent::Loading);
    revalidate(&self.store, &key, ttl, fetcher, tx, false).await;
    None
  }

  /// Fetch a single value, preferring an unexpired cache entry.
  ///
  /// Used for near-static data where serving something stale is not wanted.
  pub async fn fetch_value<K, T, F, Fut>(&self, key: &K, ttl: Duration, fetcher: F) -> Result<T>
  where
    K: QueryKey + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(cached) = self.store.get_fresh(key) {
      return Ok(cached);
    }

    let data = fetcher().await?;
    self.store.set(key, &data, ttl);
    Ok(data)
  }
}

async fn revalidate<K, T, F, Fut>(
  store: &CacheStore,
  key: &K,
  ttl: Duration,
  fetcher: F,
  tx: &UnboundedSender<ViewEvent<Vec<T>>>,
  in_background: bool,
) where
  K: QueryKey,
  T: Serialize,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Vec<T>>>,
{
  match fetcher().await {
    Ok(data) => {
      store.set(key, &data, ttl);
      let _ = tx.send(ViewEvent::Loaded {
        data,
        source: CacheSource::Network,
      });
    }
    Err(e) => {
      error!(key = %key.description(), "Error fetching fresh data: {}", e);
      // A view already showing cached data keeps it
      if !in_background {
        let _ = tx.send(ViewEvent::Failed(e.to_string()));
      }
    }
  }
}
