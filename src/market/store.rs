//! The data-access boundary: canonical marketplace records live behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{
  Item, ItemStatus, NewItem, NewNotification, NewOffer, NewRental, Notification, NotificationKind,
  Offer, OfferStatus, Rental,
};

/// Tables that publish change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
  Item,
  Offer,
  Rental,
  Notification,
  Wallet,
  Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// One realtime change, carrying the new row (or just its id for deletes).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
  pub entity: Entity,
  pub kind: ChangeKind,
  pub id: String,
  /// The user the row belongs to, where the table has one
  pub user_id: Option<String>,
  pub record: serde_json::Value,
}

/// Typed access to the canonical marketplace data.
///
/// Rental expiry uses one predicate everywhere: `status = active AND
/// end_time < now`. [`MarketStore::complete_rental`] only transitions a rental
/// that is still active, so concurrent completions cannot both win.
#[async_trait]
pub trait MarketStore: Send + Sync {
  // ── Items ───────────────────────────────────────────────────────────

  async fn insert_item(&self, item: NewItem) -> Result<Item>;

  async fn get_item(&self, id: &str) -> Result<Option<Item>>;

  async fn delete_item(&self, id: &str) -> Result<()>;

  async fn set_item_status(&self, id: &str, status: ItemStatus) -> Result<()>;

  /// A society's items, newest first, optionally without rented ones.
  async fn items_in_society(&self, society_id: &str, exclude_rented: bool) -> Result<Vec<Item>>;

  /// Items listed by `owner_id`, newest first, optionally within one society.
  async fn items_owned_by(&self, owner_id: &str, society_id: Option<&str>) -> Result<Vec<Item>>;

  async fn count_items_owned(&self, owner_id: &str) -> Result<u32>;

  /// Every item currently marked rented.
  async fn rented_items(&self) -> Result<Vec<Item>>;

  // ── Offers ──────────────────────────────────────────────────────────

  async fn insert_offer(&self, offer: NewOffer) -> Result<Offer>;

  async fn get_offer(&self, id: &str) -> Result<Option<Offer>>;

  async fn set_offer_status(&self, id: &str, status: OfferStatus) -> Result<()>;

  /// Replace price and duration as part of a counter offer.
  async fn set_offer_terms(
    &self,
    id: &str,
    offered_price: i64,
    duration_hours: i64,
    status: OfferStatus,
  ) -> Result<()>;

  /// Offers sent by `user_id` that haven't been paid for, newest first.
  async fn offers_sent_by(&self, user_id: &str) -> Result<Vec<Offer>>;

  // ── Rentals ─────────────────────────────────────────────────────────

  async fn insert_rental(&self, rental: NewRental) -> Result<Rental>;

  async fn get_rental(&self, id: &str) -> Result<Option<Rental>>;

  /// Everything `renter_id` has booked, newest first.
  async fn rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>>;

  async fn completed_rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>>;

  async fn active_rental_for_item(&self, item_id: &str) -> Result<Option<Rental>>;

  /// Active rentals whose end time is before `now`.
  async fn expired_active_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>>;

  /// Active rentals ending strictly between `from` and `to`.
  async fn active_rentals_ending_between(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Rental>>;

  /// Mark an active rental completed. Returns false if it was not active.
  async fn complete_rental(&self, id: &str, returned_at: Option<DateTime<Utc>>) -> Result<bool>;

  /// Move an active rental's end time and add to its price and duration.
  /// Returns false if it was not active.
  async fn extend_rental(
    &self,
    id: &str,
    new_end: DateTime<Utc>,
    extra_hours: i64,
    extra_price: i64,
  ) -> Result<bool>;

  // ── Notifications ───────────────────────────────────────────────────

  async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;

  /// A user's latest notifications, newest first.
  async fn notifications_for(&self, user_id: &str, limit: u32) -> Result<Vec<Notification>>;

  async fn notification_exists(&self, rental_id: &str, kind: NotificationKind) -> Result<bool>;

  async fn unread_count(&self, user_id: &str) -> Result<u32>;

  async fn mark_read(&self, ids: &[String]) -> Result<()>;

  async fn mark_actioned(&self, id: &str) -> Result<()>;

  async fn delete_notifications(&self, ids: &[String]) -> Result<()>;

  // ── Wallets ─────────────────────────────────────────────────────────

  async fn wallet_balance(&self, user_id: &str) -> Result<Option<i64>>;

  async fn create_wallet(&self, user_id: &str, balance: i64) -> Result<i64>;

  /// Take `amount` from the wallet if it holds at least that much.
  async fn debit_wallet(&self, user_id: &str, amount: i64) -> Result<bool>;

  /// Add `amount` back to an existing wallet.
  async fn credit_wallet(&self, user_id: &str, amount: i64) -> Result<()>;

  // ── Profiles ────────────────────────────────────────────────────────

  async fn profile_society(&self, user_id: &str) -> Result<Option<String>>;

  async fn set_profile_society(&self, user_id: &str, society_id: &str) -> Result<()>;

  async fn society_name(&self, society_id: &str) -> Result<Option<String>>;

  // ── Realtime ────────────────────────────────────────────────────────

  /// Stream of every change made through this store.
  fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
