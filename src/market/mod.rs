//! The rental marketplace: records, cache keys, background reconciliation,
//! screen loaders and user actions.

pub mod actions;
pub mod cache;
#[cfg(test)]
pub(crate) mod faulty;
pub mod notify;
pub mod reconciler;
pub mod store;
pub mod trust;
pub mod types;
pub mod views;

pub use actions::{ActionError, MarketActions, Payment, PaymentQuote, WalletPolicy};
pub use cache::{CacheKey, Namespace, TtlPolicy};
pub use notify::{Notifier, Subscription};
pub use reconciler::{ExpireReport, ReconcilerConfig, ReconcilerHandle, RentalReconciler};
pub use store::{ChangeEvent, ChangeKind, Entity, MarketStore};
pub use trust::{TrustPolicy, TrustScoreEstimator};
pub use views::{HomeFeed, MarketViews};

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLayer, CacheStorage, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::SqliteMarketStore;

/// Every marketplace service wired to one store, cache and clock.
#[derive(Clone)]
pub struct Market {
  pub store: Arc<dyn MarketStore>,
  pub cache: CacheStore,
  pub notifier: Notifier,
  pub reconciler: Arc<RentalReconciler>,
  pub views: MarketViews,
  pub actions: MarketActions,
  pub trust: Arc<TrustScoreEstimator>,
}

impl Market {
  /// Open the configured database and cache with the system clock.
  pub fn open(config: &Config) -> Result<Self> {
    let path = config.database.resolve_path()?;
    debug!(path = %path.display(), "Opening marketplace database");

    let store = Arc::new(SqliteMarketStore::open(&path)?);
    let storage = config.cache.open_storage();

    Ok(Self::new(store, storage, Arc::new(SystemClock), config))
  }

  pub fn new(
    store: Arc<dyn MarketStore>,
    storage: Arc<dyn CacheStorage>,
    clock: Arc<dyn Clock>,
    config: &Config,
  ) -> Self {
    let cache = CacheStore::new(storage, clock.clone());
    let notifier = Notifier::new(store.clone());
    let reconciler = Arc::new(RentalReconciler::new(
      store.clone(),
      notifier.clone(),
      clock.clone(),
      config.reconciler,
    ));
    let views = MarketViews::new(
      store.clone(),
      CacheLayer::new(cache.clone()),
      reconciler.clone(),
      notifier.clone(),
      config.cache.ttl,
    );
    let actions = MarketActions::new(
      store.clone(),
      cache.clone(),
      notifier.clone(),
      clock,
      config.wallet,
    );
    let trust = Arc::new(TrustScoreEstimator::new(store.clone(), config.trust));

    Self {
      store,
      cache,
      notifier,
      reconciler,
      views,
      actions,
      trust,
    }
  }
}
