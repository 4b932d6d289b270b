//! Marketplace record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A status string that doesn't belong to the enum it was parsed as.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
  pub kind: &'static str,
  pub value: String,
}

/// Declares a closed, snake_case string enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
  (
    $(#[$meta:meta])*
    $name:ident: $kind:literal { $($variant:ident => $text:literal),+ $(,)? }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum $name {
      $($variant),+
    }

    impl $name {
      pub fn as_str(&self) -> &'static str {
        match self {
          $(Self::$variant => $text),+
        }
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = UnknownVariant;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($text => Ok(Self::$variant),)+
          _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
        }
      }
    }
  };
}

string_enum! {
  /// Whether an item can currently be rented.
  ItemStatus: "item status" {
    Available => "available",
    Rented => "rented",
  }
}

string_enum! {
  OfferStatus: "offer status" {
    Pending => "pending",
    Countered => "countered",
    Accepted => "accepted",
    Declined => "declined",
    Completed => "completed",
  }
}

string_enum! {
  RentalStatus: "rental status" {
    Active => "active",
    Completed => "completed",
  }
}

string_enum! {
  /// What a notification is about.
  NotificationKind: "notification type" {
    OfferRequest => "offer_request",
    OfferAccepted => "offer_accepted",
    OfferDeclined => "offer_declined",
    OfferCountered => "offer_countered",
    PaymentReceived => "payment_received",
    RentalExpiredOwner => "rental_expired_owner",
    RentalExpiredRenter => "rental_expired_renter",
    RentalExpiringSoon => "rental_expiring_soon",
    RentalReturned => "rental_returned",
    RentalExtended => "rental_extended",
  }
}

/// Which side of an offer is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
  /// The item owner, who receives the offer
  Owner,
  /// The prospective renter, who sent the offer
  Renter,
}

/// A response to an open offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
  Accept,
  Decline,
  Counter,
}

impl OfferAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Accept => "accept",
      Self::Decline => "decline",
      Self::Counter => "counter",
    }
  }
}

impl OfferStatus {
  /// The status an offer moves to when `by` takes `action`, if allowed.
  ///
  /// The owner answers a pending offer; the renter answers a counter.
  /// Either side may walk away from an open negotiation.
  pub fn apply(self, action: OfferAction, by: Party) -> Option<OfferStatus> {
    use OfferAction::*;
    use OfferStatus::*;

    match (self, action, by) {
      (Pending, Accept, Party::Owner) | (Countered, Accept, Party::Renter) => Some(Accepted),
      (Pending | Countered, Decline, _) => Some(Declined),
      (Pending, Counter, Party::Owner) => Some(Countered),
      _ => None,
    }
  }
}

/// A rentable asset listed by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id: String,
  pub title: String,
  pub description: Option<String>,
  pub category: String,
  pub daily_rate: i64,
  pub market_price: Option<i64>,
  pub images: Vec<String>,
  pub owner_id: String,
  pub society_id: String,
  pub status: ItemStatus,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
  pub title: String,
  pub description: Option<String>,
  pub category: String,
  pub daily_rate: i64,
  pub market_price: Option<i64>,
  pub images: Vec<String>,
  pub owner_id: String,
  pub society_id: String,
}

/// A renter's proposal on an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
  pub id: String,
  pub item_id: String,
  pub sender_id: String,
  pub receiver_id: String,
  /// Per day
  pub offered_price: i64,
  pub duration_hours: i64,
  pub status: OfferStatus,
  pub created_at: DateTime<Utc>,
}

impl Offer {
  /// Which side `user_id` is on, if either.
  pub fn party(&self, user_id: &str) -> Option<Party> {
    if user_id == self.receiver_id {
      Some(Party::Owner)
    } else if user_id == self.sender_id {
      Some(Party::Renter)
    } else {
      None
    }
  }

  /// Code the renter must read back from the owner at handover.
  pub fn handover_code(&self) -> String {
    let start = self
      .id
      .char_indices()
      .rev()
      .nth(5)
      .map(|(i, _)| i)
      .unwrap_or(0);
    self.id[start..].to_uppercase()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOffer {
  pub item_id: String,
  pub sender_id: String,
  pub receiver_id: String,
  pub offered_price: i64,
  pub duration_hours: i64,
}

/// A confirmed, paid occupancy of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
  pub id: String,
  pub item_id: String,
  pub renter_id: String,
  pub owner_id: String,
  pub final_price: i64,
  pub duration_hours: i64,
  pub start_time: DateTime<Utc>,
  pub end_time: DateTime<Utc>,
  pub status: RentalStatus,
  pub is_insured: bool,
  pub returned_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRental {
  pub item_id: String,
  pub renter_id: String,
  pub owner_id: String,
  pub final_price: i64,
  pub duration_hours: i64,
  pub start_time: DateTime<Utc>,
  pub end_time: DateTime<Utc>,
  pub is_insured: bool,
}

/// A message to a user about a state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: String,
  pub user_id: String,
  pub title: String,
  pub message: String,
  #[serde(rename = "type")]
  pub kind: NotificationKind,
  pub related_user_id: Option<String>,
  pub related_rental_id: Option<String>,
  pub related_offer_id: Option<String>,
  pub is_read: bool,
  pub is_actioned: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
  pub user_id: String,
  pub title: String,
  pub message: String,
  pub kind: NotificationKind,
  pub related_user_id: Option<String>,
  pub related_rental_id: Option<String>,
  pub related_offer_id: Option<String>,
}

impl NewNotification {
  pub fn new(
    user_id: impl Into<String>,
    kind: NotificationKind,
    title: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      user_id: user_id.into(),
      title: title.into(),
      message: message.into(),
      kind,
      related_user_id: None,
      related_rental_id: None,
      related_offer_id: None,
    }
  }

  pub fn about_user(mut self, user_id: impl Into<String>) -> Self {
    self.related_user_id = Some(user_id.into());
    self
  }

  pub fn about_rental(mut self, rental_id: impl Into<String>) -> Self {
    self.related_rental_id = Some(rental_id.into());
    self
  }

  pub fn about_offer(mut self, offer_id: impl Into<String>) -> Self {
    self.related_offer_id = Some(offer_id.into());
    self
  }
}
