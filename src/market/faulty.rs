//! A [`MarketStore`] wrapper for tests that fails or races on request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::store::{ChangeEvent, MarketStore};
use super::types::{
  Item, ItemStatus, NewItem, NewNotification, NewOffer, NewRental, Notification, NotificationKind,
  Offer, OfferStatus, Rental,
};
use crate::db::SqliteMarketStore;

pub struct FaultyStore {
  pub inner: Arc<SqliteMarketStore>,
  /// `set_item_status` errors
  pub fail_item_status: AtomicBool,
  /// `expired_active_rentals` errors
  pub fail_expired_query: AtomicBool,
  /// `debit_wallet` first completes this rental, like a concurrent expire pass
  pub complete_on_debit: Mutex<Option<String>>,
}

impl FaultyStore {
  pub fn new(inner: Arc<SqliteMarketStore>) -> Self {
    Self {
      inner,
      fail_item_status: AtomicBool::new(false),
      fail_expired_query: AtomicBool::new(false),
      complete_on_debit: Mutex::new(None),
    }
  }
}

#[async_trait]
impl MarketStore for FaultyStore {
  async fn insert_item(&self, item: NewItem) -> Result<Item> {
    self.inner.insert_item(item).await
  }

  async fn get_item(&self, id: &str) -> Result<Option<Item>> {
    self.inner.get_item(id).await
  }

  async fn delete_item(&self, id: &str) -> Result<()> {
    self.inner.delete_item(id).await
  }

  async fn set_item_status(&self, id: &str, status: ItemStatus) -> Result<()> {
    if self.fail_item_status.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to update item {}: connection reset", id));
    }
    self.inner.set_item_status(id, status).await
  }

  async fn items_in_society(&self, society_id: &str, exclude_rented: bool) -> Result<Vec<Item>> {
    self.inner.items_in_society(society_id, exclude_rented).await
  }

  async fn items_owned_by(&self, owner_id: &str, society_id: Option<&str>) -> Result<Vec<Item>> {
    self.inner.items_owned_by(owner_id, society_id).await
  }

  async fn count_items_owned(&self, owner_id: &str) -> Result<u32> {
    self.inner.count_items_owned(owner_id).await
  }

  async fn rented_items(&self) -> Result<Vec<Item>> {
    self.inner.rented_items().await
  }

  async fn insert_offer(&self, offer: NewOffer) -> Result<Offer> {
    self.inner.insert_offer(offer).await
  }

  async fn get_offer(&self, id: &str) -> Result<Option<Offer>> {
    self.inner.get_offer(id).await
  }

  async fn set_offer_status(&self, id: &str, status: OfferStatus) -> Result<()> {
    self.inner.set_offer_status(id, status).await
  }

  async fn set_offer_terms(
    &self,
    id: &str,
    offered_price: i64,
    duration_hours: i64,
    status: OfferStatus,
  ) -> Result<()> {
    self
      .inner
      .set_offer_terms(id, offered_price, duration_hours, status)
      .await
  }

  async fn offers_sent_by(&self, user_id: &str) -> Result<Vec<Offer>> {
    self.inner.offers_sent_by(user_id).await
  }

  async fn insert_rental(&self, rental: NewRental) -> Result<Rental> {
    self.inner.insert_rental(rental).await
  }

  async fn get_rental(&self, id: &str) -> Result<Option<Rental>> {
    self.inner.get_rental(id).await
  }

  async fn rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>> {
    self.inner.rentals_for_renter(renter_id).await
  }

  async fn completed_rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>> {
    self.inner.completed_rentals_for_renter(renter_id).await
  }

  async fn active_rental_for_item(&self, item_id: &str) -> Result<Option<Rental>> {
    self.inner.active_rental_for_item(item_id).await
  }

  async fn expired_active_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>> {
    if self.fail_expired_query.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to query expired rentals: connection reset"));
    }
    self.inner.expired_active_rentals(now).await
  }

  async fn active_rentals_ending_between(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Rental>> {
    self.inner.active_rentals_ending_between(from, to).await
  }

  async fn complete_rental(&self, id: &str, returned_at: Option<DateTime<Utc>>) -> Result<bool> {
    self.inner.complete_rental(id, returned_at).await
  }

  async fn extend_rental(
    &self,
    id: &str,
    new_end: DateTime<Utc>,
    extra_hours: i64,
    extra_price: i64,
  ) -> Result<bool> {
    self
      .inner
      .extend_rental(id, new_end, extra_hours, extra_price)
      .await
  }

  async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
    self.inner.insert_notification(notification).await
  }

  async fn notifications_for(&self, user_id: &str, limit: u32) -> Result<Vec<Notification>> {
    self.inner.notifications_for(user_id, limit).await
  }

  async fn notification_exists(&self, rental_id: &str, kind: NotificationKind) -> Result<bool> {
    self.inner.notification_exists(rental_id, kind).await
  }

  async fn unread_count(&self, user_id: &str) -> Result<u32> {
    self.inner.unread_count(user_id).await
  }

  async fn mark_read(&self, ids: &[String]) -> Result<()> {
    self.inner.mark_read(ids).await
  }

  async fn mark_actioned(&self, id: &str) -> Result<()> {
    self.inner.mark_actioned(id).await
  }

  async fn delete_notifications(&self, ids: &[String]) -> Result<()> {
    self.inner.delete_notifications(ids).await
  }

  async fn wallet_balance(&self, user_id: &str) -> Result<Option<i64>> {
    self.inner.wallet_balance(user_id).await
  }

  async fn create_wallet(&self, user_id: &str, balance: i64) -> Result<i64> {
    self.inner.create_wallet(user_id, balance).await
  }

  async fn debit_wallet(&self, user_id: &str, amount: i64) -> Result<bool> {
    let racing = self.complete_on_debit.lock().unwrap().take();
    if let Some(rental_id) = racing {
      self.inner.complete_rental(&rental_id, None).await?;
    }
    self.inner.debit_wallet(user_id, amount).await
  }

  async fn credit_wallet(&self, user_id: &str, amount: i64) -> Result<()> {
    self.inner.credit_wallet(user_id, amount).await
  }

  async fn profile_society(&self, user_id: &str) -> Result<Option<String>> {
    self.inner.profile_society(user_id).await
  }

  async fn set_profile_society(&self, user_id: &str, society_id: &str) -> Result<()> {
    self.inner.set_profile_society(user_id, society_id).await
  }

  async fn society_name(&self, society_id: &str) -> Result<Option<String>> {
    self.inner.society_name(society_id).await
  }

  fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.inner.subscribe()
  }
}
