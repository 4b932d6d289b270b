//! User-initiated writes: listings, offers, payment, returns and profile changes.
//!
//! Each action validates, writes through the store, and only then
//! invalidates the cache keys it could have changed and notifies the other
//! party. A failed write returns early, so nothing is invalidated or sent.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cache::CacheKey;
use super::notify::Notifier;
use super::store::MarketStore;
use super::types::{
  Item, ItemStatus, NewItem, NewNotification, NewOffer, NewRental, NotificationKind, Offer,
  OfferAction, OfferStatus, Party, Rental, RentalStatus,
};
use crate::cache::CacheStore;
use crate::clock::Clock;

/// Why an action was refused. Carried inside the returned report; use
/// `downcast_ref::<ActionError>()` to tell it apart from storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
  #[error("{entity} {id} not found")]
  NotFound { entity: &'static str, id: String },
  #[error("Only the owner can do that")]
  NotOwner,
  #[error("You can't make an offer on your own item")]
  OwnOffer,
  #[error("You are not part of this {0}")]
  NotParticipant(&'static str),
  #[error("Can't {action} an offer that is {status}")]
  InvalidTransition {
    action: &'static str,
    status: OfferStatus,
  },
  #[error("The handover code does not match. Ask the owner for the correct code.")]
  InvalidHandoverCode,
  #[error("Insufficient Balance. You need ₹{needed}, but you have ₹{available}")]
  InsufficientBalance { needed: i64, available: i64 },
  #[error("This item is currently rented")]
  ItemUnavailable,
  #[error("This rental has already ended")]
  RentalNotActive,
  #[error("Invalid {0}")]
  InvalidTerms(&'static str),
}

/// Highest accepted daily rate or offered price, in rupees.
pub const MAX_DAILY_RATE: i64 = 10_000_000;
/// Longest accepted rental duration or extension: one year.
pub const MAX_DURATION_HOURS: i64 = 24 * 365;

/// Wallet and pricing rules applied at payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WalletPolicy {
  /// Balance a wallet is created with on first payment
  pub starting_balance: i64,
  /// Items with a market price above this are insured
  pub insurance_threshold: i64,
  pub insurance_fee: i64,
}

impl Default for WalletPolicy {
  fn default() -> Self {
    Self {
      starting_balance: 5000,
      insurance_threshold: 3000,
      insurance_fee: 9,
    }
  }
}

/// What a renter pays for an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentQuote {
  pub rental_cost: i64,
  pub insurance_fee: i64,
}

impl PaymentQuote {
  pub fn total(&self) -> i64 {
    self.rental_cost.saturating_add(self.insurance_fee)
  }

  pub fn is_insured(&self) -> bool {
    self.insurance_fee > 0
  }
}

impl WalletPolicy {
  pub fn quote(&self, offer: &Offer, item: &Item) -> Result<PaymentQuote, ActionError> {
    let insured = item
      .market_price
      .is_some_and(|price| price > self.insurance_threshold);

    Ok(PaymentQuote {
      rental_cost: prorate(offer.offered_price, offer.duration_hours)?,
      insurance_fee: if insured { self.insurance_fee } else { 0 },
    })
  }
}

/// `ceil(daily_rate * hours / 24)` in whole rupees.
pub fn prorate(daily_rate: i64, hours: i64) -> Result<i64, ActionError> {
  let cost = daily_rate
    .checked_mul(hours)
    .ok_or(ActionError::InvalidTerms("price"))?;
  Ok(cost / 24 + i64::from(cost % 24 > 0))
}

/// `start` plus `hours`, refusing durations the calendar can't hold.
fn end_after(start: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>, ActionError> {
  Duration::try_hours(hours)
    .and_then(|d| start.checked_add_signed(d))
    .ok_or(ActionError::InvalidTerms("duration"))
}

/// A completed payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
  pub rental: Rental,
  pub quote: PaymentQuote,
  pub balance_after: i64,
}

#[derive(Clone)]
pub struct MarketActions {
  store: Arc<dyn MarketStore>,
  cache: CacheStore,
  notifier: Notifier,
  clock: Arc<dyn Clock>,
  wallet: WalletPolicy,
}

impl MarketActions {
  pub fn new(
    store: Arc<dyn MarketStore>,
    cache: CacheStore,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    wallet: WalletPolicy,
  ) -> Self {
    Self {
      store,
      cache,
      notifier,
      clock,
      wallet,
    }
  }

  // ── Listings ────────────────────────────────────────────────────────

  pub async fn create_listing(&self, new: NewItem) -> Result<Item> {
    if new.title.trim().is_empty() {
      return Err(ActionError::InvalidTerms("title").into());
    }
    if !(1..=MAX_DAILY_RATE).contains(&new.daily_rate) {
      return Err(ActionError::InvalidTerms("daily rate").into());
    }

    let item = self.store.insert_item(new).await?;

    self.cache.invalidate(&CacheKey::listings(&item.owner_id));
    self.cache.invalidate(&CacheKey::home_items(&item.society_id));
    info!(item = %item.id, owner = %item.owner_id, "Listed item");
    Ok(item)
  }

  /// Remove a listing. Items out on rent can't be removed.
  pub async fn delete_listing(&self, user_id: &str, item_id: &str) -> Result<()> {
    let item = self.item(item_id).await?;
    if item.owner_id != user_id {
      return Err(ActionError::NotOwner.into());
    }
    if item.status == ItemStatus::Rented {
      return Err(ActionError::ItemUnavailable.into());
    }

    self.store.delete_item(item_id).await?;

    self.cache.invalidate(&CacheKey::listings(&item.owner_id));
    self.cache.invalidate(&CacheKey::home_items(&item.society_id));
    Ok(())
  }

  // ── Offers ──────────────────────────────────────────────────────────

  pub async fn send_offer(
    &self,
    sender_id: &str,
    item_id: &str,
    offered_price: i64,
    duration_hours: i64,
  ) -> Result<Offer> {
    validate_terms(offered_price, duration_hours)?;
    let item = self.item(item_id).await?;
    if item.owner_id == sender_id {
      return Err(ActionError::OwnOffer.into());
    }
    if item.status == ItemStatus::Rented {
      return Err(ActionError::ItemUnavailable.into());
    }

    let offer = self
      .store
      .insert_offer(NewOffer {
        item_id: item.id.clone(),
        sender_id: sender_id.to_string(),
        receiver_id: item.owner_id.clone(),
        offered_price,
        duration_hours,
      })
      .await?;

    self.cache.invalidate(&CacheKey::offers(sender_id));
    self
      .notifier
      .notify(
        NewNotification::new(
          &item.owner_id,
          NotificationKind::OfferRequest,
          "New Offer Received",
          format!(
            "Someone offered ₹{}/day for {} ({} hours).",
            offered_price, item.title, duration_hours
          ),
        )
        .about_user(sender_id)
        .about_offer(&offer.id),
      )
      .await;

    Ok(offer)
  }

  /// Accept an offer: the owner accepts a pending offer, the renter a counter.
  pub async fn accept_offer(&self, user_id: &str, offer_id: &str) -> Result<Offer> {
    let (offer, party, status) = self.respond(user_id, offer_id, OfferAction::Accept).await?;
    self.store.set_offer_status(&offer.id, status).await?;
    self.invalidate_offers(&offer);

    let title = self.item_title(&offer.item_id).await;
    let notification = match party {
      Party::Owner => NewNotification::new(
        &offer.sender_id,
        NotificationKind::OfferAccepted,
        "Offer Accepted",
        format!("Your offer for {} was accepted. You can now proceed to payment.", title),
      ),
      Party::Renter => NewNotification::new(
        &offer.receiver_id,
        NotificationKind::OfferAccepted,
        "Counter Offer Accepted",
        format!("Your counter offer for {} was accepted.", title),
      ),
    };
    self
      .notifier
      .notify(notification.about_user(user_id).about_offer(&offer.id))
      .await;

    Ok(Offer { status, ..offer })
  }

  /// Walk away from an open negotiation. Either side may decline.
  pub async fn decline_offer(&self, user_id: &str, offer_id: &str) -> Result<Offer> {
    let (offer, party, status) = self.respond(user_id, offer_id, OfferAction::Decline).await?;
    self.store.set_offer_status(&offer.id, status).await?;
    self.invalidate_offers(&offer);

    let title = self.item_title(&offer.item_id).await;
    let counterpart = match party {
      Party::Owner => &offer.sender_id,
      Party::Renter => &offer.receiver_id,
    };
    self
      .notifier
      .notify(
        NewNotification::new(
          counterpart,
          NotificationKind::OfferDeclined,
          "Offer Declined",
          format!("The offer for {} was declined.", title),
        )
        .about_user(user_id)
        .about_offer(&offer.id),
      )
      .await;

    Ok(Offer { status, ..offer })
  }

  /// Owner proposes different terms on a pending offer.
  pub async fn counter_offer(
    &self,
    user_id: &str,
    offer_id: &str,
    offered_price: i64,
    duration_hours: i64,
  ) -> Result<Offer> {
    validate_terms(offered_price, duration_hours)?;
    let (offer, _, status) = self.respond(user_id, offer_id, OfferAction::Counter).await?;
    self
      .store
      .set_offer_terms(&offer.id, offered_price, duration_hours, status)
      .await?;
    self.cache.invalidate(&CacheKey::offers(&offer.sender_id));

    let title = self.item_title(&offer.item_id).await;
    self
      .notifier
      .notify(
        NewNotification::new(
          &offer.sender_id,
          NotificationKind::OfferCountered,
          "Counter Offer",
          format!(
            "The owner of {} countered with ₹{}/day for {} hours.",
            title, offered_price, duration_hours
          ),
        )
        .about_user(user_id)
        .about_offer(&offer.id),
      )
      .await;

    Ok(Offer {
      offered_price,
      duration_hours,
      status,
      ..offer
    })
  }

  async fn respond(
    &self,
    user_id: &str,
    offer_id: &str,
    action: OfferAction,
  ) -> Result<(Offer, Party, OfferStatus)> {
    let offer = self.offer(offer_id).await?;
    let party = offer
      .party(user_id)
      .ok_or(ActionError::NotParticipant("offer"))?;
    let status = offer
      .status
      .apply(action, party)
      .ok_or(ActionError::InvalidTransition {
        action: action.as_str(),
        status: offer.status,
      })?;

    Ok((offer, party, status))
  }

  // ── Payment ─────────────────────────────────────────────────────────

  /// Pay for an accepted offer at handover and start the rental.
  ///
  /// The renter reads `handover_code` from the owner; it must match the
  /// offer's code, ignoring case.
  pub async fn complete_payment(
    &self,
    payer_id: &str,
    offer_id: &str,
    handover_code: &str,
  ) -> Result<Payment> {
    let offer = self.offer(offer_id).await?;
    if offer.sender_id != payer_id {
      return Err(ActionError::NotParticipant("offer").into());
    }
    if offer.status != OfferStatus::Accepted {
      return Err(
        ActionError::InvalidTransition {
          action: "pay for",
          status: offer.status,
        }
        .into(),
      );
    }
    if handover_code.trim().to_uppercase() != offer.handover_code() {
      return Err(ActionError::InvalidHandoverCode.into());
    }

    let item = self.item(&offer.item_id).await?;
    if item.status == ItemStatus::Rented {
      return Err(ActionError::ItemUnavailable.into());
    }

    let quote = self.wallet.quote(&offer, &item)?;
    let now = self.clock.now();
    let end_time = end_after(now, offer.duration_hours)?;
    let balance_after = self.charge(payer_id, quote.total()).await?;

    let rental = self
      .store
      .insert_rental(NewRental {
        item_id: item.id.clone(),
        renter_id: payer_id.to_string(),
        owner_id: item.owner_id.clone(),
        final_price: quote.total(),
        duration_hours: offer.duration_hours,
        start_time: now,
        end_time,
        is_insured: quote.is_insured(),
      })
      .await?;
    self.store.set_item_status(&item.id, ItemStatus::Rented).await?;
    self
      .store
      .set_offer_status(&offer.id, OfferStatus::Completed)
      .await?;

    self.cache.invalidate(&CacheKey::bookings(payer_id));
    self.cache.invalidate(&CacheKey::offers(payer_id));
    self.cache.invalidate(&CacheKey::home_items(&item.society_id));
    self.cache.invalidate(&CacheKey::listings(&item.owner_id));

    self
      .notifier
      .notify(
        NewNotification::new(
          &item.owner_id,
          NotificationKind::PaymentReceived,
          "Payment Received",
          format!("₹{} received for {}. The rental is now active.", quote.total(), item.title),
        )
        .about_user(payer_id)
        .about_rental(&rental.id),
      )
      .await;

    info!(rental = %rental.id, total = quote.total(), "Payment completed");
    Ok(Payment {
      rental,
      quote,
      balance_after,
    })
  }

  /// Debit `amount`, creating the wallet on first use. Returns the new balance.
  async fn charge(&self, user_id: &str, amount: i64) -> Result<i64> {
    let balance = match self.store.wallet_balance(user_id).await? {
      Some(balance) => balance,
      None => {
        self
          .store
          .create_wallet(user_id, self.wallet.starting_balance)
          .await?
      }
    };

    if balance < amount || !self.store.debit_wallet(user_id, amount).await? {
      let available = self.store.wallet_balance(user_id).await?.unwrap_or(balance);
      return Err(
        ActionError::InsufficientBalance {
          needed: amount,
          available,
        }
        .into(),
      );
    }

    Ok(balance - amount)
  }

  // ── Rentals ─────────────────────────────────────────────────────────

  /// Renter hands the item back early or on time.
  pub async fn return_rental(&self, user_id: &str, rental_id: &str) -> Result<Rental> {
    let rental = self.rental(rental_id).await?;
    if rental.renter_id != user_id {
      return Err(ActionError::NotParticipant("rental").into());
    }

    let now = self.clock.now();
    if !self.store.complete_rental(&rental.id, Some(now)).await? {
      return Err(ActionError::RentalNotActive.into());
    }
    self
      .store
      .set_item_status(&rental.item_id, ItemStatus::Available)
      .await?;

    let item = self.store.get_item(&rental.item_id).await?;
    self.cache.invalidate(&CacheKey::bookings(user_id));
    self.cache.invalidate(&CacheKey::listings(&rental.owner_id));
    if let Some(item) = &item {
      self.cache.invalidate(&CacheKey::home_items(&item.society_id));
    }

    let title = item.map(|i| i.title).unwrap_or_else(|| "your item".to_string());
    self
      .notifier
      .notify(
        NewNotification::new(
          &rental.owner_id,
          NotificationKind::RentalReturned,
          "Item Returned",
          format!("{} has been returned.", title),
        )
        .about_user(user_id)
        .about_rental(&rental.id),
      )
      .await;

    Ok(Rental {
      status: RentalStatus::Completed,
      returned_at: Some(now),
      ..rental
    })
  }

  /// Keep an active rental longer, paying the item's daily rate pro rata.
  pub async fn extend_rental(
    &self,
    user_id: &str,
    rental_id: &str,
    extra_hours: i64,
  ) -> Result<Rental> {
    if !(1..=MAX_DURATION_HOURS).contains(&extra_hours) {
      return Err(ActionError::InvalidTerms("duration").into());
    }
    let rental = self.rental(rental_id).await?;
    if rental.renter_id != user_id {
      return Err(ActionError::NotParticipant("rental").into());
    }
    if rental.status != RentalStatus::Active {
      return Err(ActionError::RentalNotActive.into());
    }

    let item = self.item(&rental.item_id).await?;
    let price = prorate(item.daily_rate, extra_hours)?;
    let new_end = end_after(rental.end_time, extra_hours)?;
    self.charge(user_id, price).await?;

    // The rental can end between the status check and the update
    let extended = self
      .store
      .extend_rental(&rental.id, new_end, extra_hours, price)
      .await;
    if !matches!(extended, Ok(true)) {
      warn!(rental = %rental.id, price, "Rental was not extended, refunding");
      if let Err(e) = self.store.credit_wallet(user_id, price).await {
        error!(rental = %rental.id, user = %user_id, price, "Failed to refund extension: {}", e);
        return Err(e);
      }
      extended?;
      return Err(ActionError::RentalNotActive.into());
    }

    self.cache.invalidate(&CacheKey::bookings(user_id));
    self
      .notifier
      .notify(
        NewNotification::new(
          &rental.owner_id,
          NotificationKind::RentalExtended,
          "Rental Extended",
          format!("The rental of {} was extended by {} hours.", item.title, extra_hours),
        )
        .about_user(user_id)
        .about_rental(&rental.id),
      )
      .await;

    Ok(Rental {
      end_time: new_end,
      duration_hours: rental.duration_hours + extra_hours,
      final_price: rental.final_price.saturating_add(price),
      ..rental
    })
  }

  // ── Profile & notifications ─────────────────────────────────────────

  /// Move a user to another society.
  pub async fn update_profile_society(&self, user_id: &str, society_id: &str) -> Result<()> {
    let previous = self.store.profile_society(user_id).await?;
    self.store.set_profile_society(user_id, society_id).await?;

    if let Some(previous) = previous.as_deref().filter(|p| *p != society_id) {
      self.cache.invalidate(&CacheKey::home_items(previous));
      self.cache.invalidate(&CacheKey::society_name(previous));
    }
    self.cache.invalidate(&CacheKey::home_items(society_id));
    self.cache.invalidate(&CacheKey::society_name(society_id));
    self.cache.invalidate(&CacheKey::listings(user_id));
    self.cache.invalidate(&CacheKey::profile(user_id));
    Ok(())
  }

  pub async fn delete_notifications(&self, user_id: &str, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    self.store.delete_notifications(ids).await?;
    self.cache.invalidate(&CacheKey::notifications(user_id));
    Ok(())
  }

  // ── Lookups ─────────────────────────────────────────────────────────

  async fn item(&self, id: &str) -> Result<Item> {
    Ok(self.store.get_item(id).await?.ok_or_else(|| not_found("Item", id))?)
  }

  async fn offer(&self, id: &str) -> Result<Offer> {
    Ok(self.store.get_offer(id).await?.ok_or_else(|| not_found("Offer", id))?)
  }

  async fn rental(&self, id: &str) -> Result<Rental> {
    Ok(self.store.get_rental(id).await?.ok_or_else(|| not_found("Rental", id))?)
  }

  async fn item_title(&self, item_id: &str) -> String {
    match self.store.get_item(item_id).await {
      Ok(Some(item)) => item.title,
      _ => "your item".to_string(),
    }
  }

  fn invalidate_offers(&self, offer: &Offer) {
    self.cache.invalidate(&CacheKey::offers(&offer.sender_id));
    self.cache.invalidate(&CacheKey::offers(&offer.receiver_id));
  }
}

fn not_found(entity: &'static str, id: &str) -> ActionError {
  ActionError::NotFound {
    entity,
    id: id.to_string(),
  }
}

fn validate_terms(offered_price: i64, duration_hours: i64) -> Result<(), ActionError> {
  if !(1..=MAX_DAILY_RATE).contains(&offered_price) {
    return Err(ActionError::InvalidTerms("price"));
  }
  if !(1..=MAX_DURATION_HOURS).contains(&duration_hours) {
    return Err(ActionError::InvalidTerms("duration"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::clock::ManualClock;
  use crate::db::SqliteMarketStore;
  use crate::market::faulty::FaultyStore;
  use chrono::Utc;
  use color_eyre::Report;

  struct Fixture {
    store: Arc<SqliteMarketStore>,
    cache: CacheStore,
    clock: ManualClock,
    actions: MarketActions,
  }

  fn fixture() -> Fixture {
    fixture_over(|store| store as Arc<dyn MarketStore>)
  }

  /// Actions run against `backend(store)`; assertions read `store` directly.
  fn fixture_over(
    backend: impl FnOnce(Arc<SqliteMarketStore>) -> Arc<dyn MarketStore>,
  ) -> Fixture {
    let clock = ManualClock::new(Utc::now());
    let store = Arc::new(
      SqliteMarketStore::open_in_memory()
        .unwrap()
        .with_clock(Arc::new(clock.clone())),
    );
    let cache = CacheStore::new(
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      Arc::new(clock.clone()),
    );
    let backend = backend(store.clone());
    let actions = MarketActions::new(
      backend.clone(),
      cache.clone(),
      Notifier::new(backend),
      Arc::new(clock.clone()),
      WalletPolicy::default(),
    );
    Fixture {
      store,
      cache,
      clock,
      actions,
    }
  }

  fn drill(market_price: Option<i64>) -> NewItem {
    NewItem {
      title: "Cordless Drill".to_string(),
      description: Some("18V with two batteries".to_string()),
      category: "DIY Tools".to_string(),
      daily_rate: 100,
      market_price,
      images: vec![],
      owner_id: "owner".to_string(),
      society_id: "s1".to_string(),
    }
  }

  fn action_error(err: Report) -> ActionError {
    err
      .downcast_ref::<ActionError>()
      .cloned()
      .unwrap_or_else(|| panic!("expected an action error, got {}", err))
  }

  impl Fixture {
    /// An accepted offer for a listed drill.
    async fn accepted(&self, market_price: Option<i64>, price: i64, hours: i64) -> (Item, Offer) {
      let item = self.actions.create_listing(drill(market_price)).await.unwrap();
      let offer = self.actions.send_offer("renter", &item.id, price, hours).await.unwrap();
      let offer = self.actions.accept_offer("owner", &offer.id).await.unwrap();
      (item, offer)
    }

    async fn kinds(&self, user: &str) -> Vec<NotificationKind> {
      let mut kinds: Vec<_> = self
        .store
        .notifications_for(user, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
      kinds.reverse();
      kinds
    }
  }

  #[tokio::test]
  async fn test_deleted_listing_leaves_owner_listings_cache() {
    let f = fixture();
    let item = f.actions.create_listing(drill(None)).await.unwrap();
    let key = CacheKey::listings("owner");
    f.cache.set(&key, &vec![item.clone()], Duration::minutes(5));

    let err = f.actions.delete_listing("intruder", &item.id).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::NotOwner);
    assert!(f.cache.get_fresh::<_, Vec<Item>>(&key).is_some());

    f.actions.delete_listing("owner", &item.id).await.unwrap();
    let cached = f.cache.get_stale::<_, Vec<Item>>(&key);
    assert!(cached.data.unwrap_or_default().iter().all(|i| i.id != item.id));
    assert_eq!(f.store.get_item(&item.id).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_create_listing_validates_and_invalidates_feed() {
    let f = fixture();
    let home = CacheKey::home_items("s1");
    f.cache.set(&home, &Vec::<Item>::new(), Duration::minutes(2));

    let bad = NewItem { daily_rate: 0, ..drill(None) };
    let err = f.actions.create_listing(bad).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("daily rate"));
    assert!(f.cache.get_stale::<_, Vec<Item>>(&home).data.is_some());

    f.actions.create_listing(drill(None)).await.unwrap();
    assert!(f.cache.get_stale::<_, Vec<Item>>(&home).data.is_none());
  }

  #[tokio::test]
  async fn test_negotiation_then_payment() {
    let f = fixture();
    let item = f.actions.create_listing(drill(Some(4000))).await.unwrap();

    let err = f.actions.send_offer("owner", &item.id, 80, 24).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::OwnOffer);

    let offer = f.actions.send_offer("renter", &item.id, 80, 24).await.unwrap();
    let err = f.actions.accept_offer("renter", &offer.id).await.unwrap_err();
    assert_eq!(
      action_error(err),
      ActionError::InvalidTransition {
        action: "accept",
        status: OfferStatus::Pending
      }
    );

    let countered = f.actions.counter_offer("owner", &offer.id, 100, 36).await.unwrap();
    assert_eq!(countered.status, OfferStatus::Countered);
    let accepted = f.actions.accept_offer("renter", &offer.id).await.unwrap();
    assert_eq!(accepted.status, OfferStatus::Accepted);

    let code = offer.handover_code().to_lowercase();
    let payment = f.actions.complete_payment("renter", &offer.id, &code).await.unwrap();

    // ceil(100 * 36 / 24) = 150, plus insurance
    assert_eq!(payment.quote, PaymentQuote { rental_cost: 150, insurance_fee: 9 });
    assert_eq!(payment.balance_after, 5000 - 159);
    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), Some(4841));

    let rental = f.store.get_rental(&payment.rental.id).await.unwrap().unwrap();
    assert_eq!(rental.status, RentalStatus::Active);
    assert!(rental.is_insured);
    assert_eq!(rental.end_time - rental.start_time, Duration::hours(36));
    assert_eq!(
      f.store.get_item(&item.id).await.unwrap().unwrap().status,
      ItemStatus::Rented
    );
    assert_eq!(
      f.store.get_offer(&offer.id).await.unwrap().unwrap().status,
      OfferStatus::Completed
    );

    assert_eq!(
      f.kinds("owner").await,
      vec![
        NotificationKind::OfferRequest,
        NotificationKind::OfferAccepted,
        NotificationKind::PaymentReceived
      ]
    );
    assert_eq!(
      f.kinds("renter").await,
      vec![NotificationKind::OfferCountered]
    );
  }

  #[tokio::test]
  async fn test_wrong_handover_code_charges_nothing() {
    let f = fixture();
    let (item, offer) = f.accepted(None, 100, 24).await;

    let err = f
      .actions
      .complete_payment("renter", &offer.id, "000000")
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidHandoverCode);

    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), None);
    assert_eq!(
      f.store.get_item(&item.id).await.unwrap().unwrap().status,
      ItemStatus::Available
    );
  }

  #[tokio::test]
  async fn test_insufficient_balance_is_rejected() {
    let f = fixture();
    let (_, offer) = f.accepted(None, 6000, 24).await;
    let bookings = CacheKey::bookings("renter");
    f.cache.set(&bookings, &Vec::<Rental>::new(), Duration::minutes(2));

    let err = f
      .actions
      .complete_payment("renter", &offer.id, &offer.handover_code())
      .await
      .unwrap_err();
    assert_eq!(
      action_error(err),
      ActionError::InsufficientBalance {
        needed: 6000,
        available: 5000
      }
    );
    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), Some(5000));
    assert!(f.cache.get_fresh::<_, Vec<Rental>>(&bookings).is_some());
    assert!(f.store.rentals_for_renter("renter").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_return_then_return_again() {
    let f = fixture();
    let (item, offer) = f.accepted(None, 100, 24).await;
    let payment = f
      .actions
      .complete_payment("renter", &offer.id, &offer.handover_code())
      .await
      .unwrap();

    f.clock.advance(Duration::hours(20));
    let err = f.actions.return_rental("owner", &payment.rental.id).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::NotParticipant("rental"));

    let returned = f.actions.return_rental("renter", &payment.rental.id).await.unwrap();
    assert_eq!(returned.status, RentalStatus::Completed);

    let stored = f.store.get_rental(&payment.rental.id).await.unwrap().unwrap();
    assert_eq!(
      stored.returned_at.map(|t| t.timestamp_millis()),
      Some(f.clock.now().timestamp_millis())
    );
    assert_eq!(
      f.store.get_item(&item.id).await.unwrap().unwrap().status,
      ItemStatus::Available
    );
    assert!(f.kinds("owner").await.contains(&NotificationKind::RentalReturned));

    let err = f.actions.return_rental("renter", &payment.rental.id).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::RentalNotActive);
  }

  #[tokio::test]
  async fn test_extend_rental_charges_pro_rata() {
    let f = fixture();
    let (_, offer) = f.accepted(None, 100, 24).await;
    let payment = f
      .actions
      .complete_payment("renter", &offer.id, &offer.handover_code())
      .await
      .unwrap();

    // Daily rate 100 for 30 hours is ceil(125) = 125
    let extended = f
      .actions
      .extend_rental("renter", &payment.rental.id, 30)
      .await
      .unwrap();
    assert_eq!(extended.end_time, payment.rental.end_time + Duration::hours(30));

    let stored = f.store.get_rental(&payment.rental.id).await.unwrap().unwrap();
    assert_eq!(stored.duration_hours, 54);
    assert_eq!(stored.final_price, 100 + 125);
    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), Some(5000 - 100 - 125));
    assert!(f.kinds("owner").await.contains(&NotificationKind::RentalExtended));

    let err = f
      .actions
      .extend_rental("renter", &payment.rental.id, 0)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("duration"));
  }

  #[tokio::test]
  async fn test_society_change_invalidates_both_societies() {
    let f = fixture();
    f.store.set_profile_society("u1", "old").await.unwrap();
    let keys = [
      CacheKey::home_items("old"),
      CacheKey::society_name("old"),
      CacheKey::home_items("new"),
      CacheKey::society_name("new"),
      CacheKey::listings("u1"),
      CacheKey::profile("u1"),
    ];
    let untouched = CacheKey::home_items("elsewhere");
    for key in keys.iter().chain([&untouched]) {
      f.cache.set(key, "cached", Duration::minutes(30));
    }

    f.actions.update_profile_society("u1", "new").await.unwrap();

    for key in &keys {
      assert_eq!(f.cache.get_stale::<_, String>(key).data, None, "{:?}", key);
    }
    assert!(f.cache.get_fresh::<_, String>(&untouched).is_some());
    assert_eq!(f.store.profile_society("u1").await.unwrap().as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_missing_records_are_not_found() {
    let f = fixture();
    let err = f.actions.accept_offer("owner", "nope").await.unwrap_err();
    assert_eq!(
      action_error(err),
      ActionError::NotFound {
        entity: "Offer",
        id: "nope".to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_extension_lost_to_expiry_is_refunded() {
    let mut faulty = None;
    let f = fixture_over(|store| {
      let wrapped = Arc::new(FaultyStore::new(store));
      let backend: Arc<dyn MarketStore> = wrapped.clone();
      faulty = Some(wrapped);
      backend
    });
    let faulty = faulty.unwrap();
    let (_, offer) = f.accepted(None, 100, 24).await;
    let payment = f
      .actions
      .complete_payment("renter", &offer.id, &offer.handover_code())
      .await
      .unwrap();
    let bookings = CacheKey::bookings("renter");
    f.cache.set(&bookings, &vec![payment.rental.clone()], Duration::minutes(2));

    // The rental expires while the renter is being charged
    *faulty.complete_on_debit.lock().unwrap() = Some(payment.rental.id.clone());
    let err = f
      .actions
      .extend_rental("renter", &payment.rental.id, 24)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::RentalNotActive);

    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), Some(5000 - 100));
    let stored = f.store.get_rental(&payment.rental.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RentalStatus::Completed);
    assert_eq!(stored.end_time, payment.rental.end_time);
    assert_eq!((stored.duration_hours, stored.final_price), (24, 100));
    assert!(f.cache.get_fresh::<_, Vec<Rental>>(&bookings).is_some());
    assert!(!f.kinds("owner").await.contains(&NotificationKind::RentalExtended));
  }

  #[tokio::test]
  async fn test_oversized_terms_are_rejected() {
    let f = fixture();
    let pricey = NewItem {
      daily_rate: MAX_DAILY_RATE + 1,
      ..drill(None)
    };
    let err = f.actions.create_listing(pricey).await.unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("daily rate"));

    let item = f.actions.create_listing(drill(None)).await.unwrap();
    let err = f
      .actions
      .send_offer("renter", &item.id, 10_000_000_000_000, 24)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("price"));
    let err = f
      .actions
      .send_offer("renter", &item.id, 100, 1_000_000)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("duration"));

    let offer = f.actions.send_offer("renter", &item.id, 100, 24).await.unwrap();
    let err = f
      .actions
      .counter_offer("owner", &offer.id, 100, MAX_DURATION_HOURS + 1)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("duration"));
  }

  #[tokio::test]
  async fn test_extension_price_overflow_charges_nothing() {
    let f = fixture();
    // Written straight to the store, past listing validation
    let item = f
      .store
      .insert_item(NewItem {
        daily_rate: i64::MAX / 100,
        ..drill(None)
      })
      .await
      .unwrap();
    let offer = f.actions.send_offer("renter", &item.id, 1, 24).await.unwrap();
    f.actions.accept_offer("owner", &offer.id).await.unwrap();
    let payment = f
      .actions
      .complete_payment("renter", &offer.id, &offer.handover_code())
      .await
      .unwrap();
    assert_eq!(payment.balance_after, 4999);

    let err = f
      .actions
      .extend_rental("renter", &payment.rental.id, MAX_DURATION_HOURS)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("price"));
    let err = f
      .actions
      .extend_rental("renter", &payment.rental.id, 1_000_000)
      .await
      .unwrap_err();
    assert_eq!(action_error(err), ActionError::InvalidTerms("duration"));

    assert_eq!(f.store.wallet_balance("renter").await.unwrap(), Some(4999));
    let stored = f.store.get_rental(&payment.rental.id).await.unwrap().unwrap();
    assert_eq!(stored.end_time, payment.rental.end_time);
  }

  #[test]
  fn test_prorate_rounds_up() {
    assert_eq!(prorate(100, 24), Ok(100));
    assert_eq!(prorate(100, 36), Ok(150));
    assert_eq!(prorate(7, 1), Ok(1));
    assert_eq!(prorate(90, 48), Ok(180));
    assert_eq!(prorate(i64::MAX, 2), Err(ActionError::InvalidTerms("price")));
  }

  #[test]
  fn test_end_after_rejects_unrepresentable_times() {
    let now = Utc::now();
    assert_eq!(end_after(now, 36), Ok(now + Duration::hours(36)));
    assert_eq!(end_after(now, i64::MAX), Err(ActionError::InvalidTerms("duration")));
  }
}
