//! Data loaders for the app's list screens.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cache::{CacheKey, TtlPolicy};
use super::notify::Notifier;
use super::reconciler::RentalReconciler;
use super::store::MarketStore;
use super::types::{Item, Notification, Offer, Rental};
use crate::cache::{CacheLayer, ViewEvent};

/// How many notifications the notification screen shows.
pub const NOTIFICATION_PAGE: u32 = 50;

/// Loads each screen's data through the stale-while-revalidate cache.
///
/// List loaders send [`ViewEvent`]s to `tx` and return the handle of the
/// background refresh when cached data was served first.
#[derive(Clone)]
pub struct MarketViews {
  store: Arc<dyn MarketStore>,
  cache: CacheLayer,
  reconciler: Arc<RentalReconciler>,
  notifier: Notifier,
  ttl: TtlPolicy,
}

impl MarketViews {
  pub fn new(
    store: Arc<dyn MarketStore>,
    cache: CacheLayer,
    reconciler: Arc<RentalReconciler>,
    notifier: Notifier,
    ttl: TtlPolicy,
  ) -> Self {
    Self {
      store,
      cache,
      reconciler,
      notifier,
      ttl,
    }
  }

  /// Items in a society that can be rented right now, newest first.
  ///
  /// Expired rentals are completed before the query so their items show up.
  pub async fn home_feed(
    &self,
    society_id: &str,
    force: bool,
    tx: &UnboundedSender<ViewEvent<Vec<Item>>>,
  ) -> Option<JoinHandle<()>> {
    let store = self.store.clone();
    let reconciler = self.reconciler.clone();
    let society = society_id.to_string();

    let fetch = move || async move {
      if let Err(e) = reconciler.complete_expired_rentals().await {
        warn!("Error processing completed rentals: {}", e);
      }
      store.items_in_society(&society, true).await
    };

    self
      .cache
      .load_list(CacheKey::home_items(society_id), self.ttl.short(), force, fetch, tx)
      .await
  }

  /// Items the user has listed, limited to their society when they have one.
  pub async fn listings(
    &self,
    user_id: &str,
    society_id: Option<&str>,
    force: bool,
    tx: &UnboundedSender<ViewEvent<Vec<Item>>>,
  ) -> Option<JoinHandle<()>> {
    let store = self.store.clone();
    let owner = user_id.to_string();
    let society = society_id.map(String::from);

    let fetch = move || async move { store.items_owned_by(&owner, society.as_deref()).await };

    self
      .cache
      .load_list(CacheKey::listings(user_id), self.ttl.medium(), force, fetch, tx)
      .await
  }

  /// Rentals the user has booked.
  pub async fn bookings(
    &self,
    user_id: &str,
    force: bool,
    tx: &UnboundedSender<ViewEvent<Vec<Rental>>>,
  ) -> Option<JoinHandle<()>> {
    let store = self.store.clone();
    let renter = user_id.to_string();

    let fetch = move || async move { store.rentals_for_renter(&renter).await };

    self
      .cache
      .load_list(CacheKey::bookings(user_id), self.ttl.short(), force, fetch, tx)
      .await
  }

  /// Offers the user has sent that haven't been paid for.
  pub async fn offers(
    &self,
    user_id: &str,
    force: bool,
    tx: &UnboundedSender<ViewEvent<Vec<Offer>>>,
  ) -> Option<JoinHandle<()>> {
    let store = self.store.clone();
    let sender = user_id.to_string();

    let fetch = move || async move { store.offers_sent_by(&sender).await };

    self
      .cache
      .load_list(CacheKey::offers(user_id), self.ttl.short(), force, fetch, tx)
      .await
  }

  /// The user's latest notifications. Unread ones are marked read once loaded.
  pub async fn notifications(
    &self,
    user_id: &str,
    force: bool,
    tx: &UnboundedSender<ViewEvent<Vec<Notification>>>,
  ) -> Option<JoinHandle<()>> {
    let store = self.store.clone();
    let notifier = self.notifier.clone();
    let user = user_id.to_string();

    let fetch = move || async move {
      let notifications = store.notifications_for(&user, NOTIFICATION_PAGE).await?;

      let unread: Vec<String> = notifications
        .iter()
        .filter(|n| !n.is_read)
        .map(|n| n.id.clone())
        .collect();
      if let Err(e) = notifier.mark_as_read(&unread).await {
        warn!(user = %user, "Error marking notifications read: {}", e);
      }

      Ok(notifications)
    };

    self
      .cache
      .load_list(CacheKey::notifications(user_id), self.ttl.short(), force, fetch, tx)
      .await
  }

  /// Display name of a society, cached for the long TTL.
  pub async fn society_name(&self, society_id: &str) -> Result<String> {
    let key = CacheKey::society_name(society_id);

    self
      .cache
      .fetch_value(&key, self.ttl.long(), || async {
        self
          .store
          .society_name(society_id)
          .await?
          .ok_or_else(|| eyre!("Society {} not found", society_id))
      })
      .await
  }

  /// The society the user belongs to, if their profile has one.
  pub async fn profile_society(&self, user_id: &str) -> Result<Option<String>> {
    let key = CacheKey::profile(user_id);
    let store = self.cache.store();

    if let Some(society) = store.get_fresh::<_, String>(&key) {
      return Ok(Some(society));
    }

    let society = self.store.profile_society(user_id).await?;
    if let Some(society) = &society {
      store.set(&key, society, self.ttl.long());
    }
    Ok(society)
  }

  /// Home feed for one society that reloads past the cache when `trigger` moves.
  pub fn home(&self, society_id: &str, trigger: watch::Receiver<u64>) -> HomeFeed {
    HomeFeed {
      views: self.clone(),
      society_id: society_id.to_string(),
      trigger,
      seen: None,
    }
  }
}

/// The home screen's feed, tied to the session's refresh trigger.
pub struct HomeFeed {
  views: MarketViews,
  society_id: String,
  trigger: watch::Receiver<u64>,
  seen: Option<u64>,
}

impl HomeFeed {
  /// Load the feed. The first load may serve from cache; a load after the
  /// trigger moved goes straight to the store.
  pub async fn load(
    &mut self,
    tx: &UnboundedSender<ViewEvent<Vec<Item>>>,
  ) -> Option<JoinHandle<()>> {
    let generation = *self.trigger.borrow_and_update();
    let force = self.seen.is_some_and(|seen| seen != generation);
    self.seen = Some(generation);

    if force {
      debug!(society = %self.society_id, generation, "Refresh requested, bypassing cache");
    }
    self.views.home_feed(&self.society_id, force, tx).await
  }

  /// Wait for the next refresh request. Returns false once the session is gone.
  pub async fn changed(&mut self) -> bool {
    self.trigger.changed().await.is_ok()
  }
}
