//! Cache keys and TTLs for marketplace data.
//!
//! Every cache read, write and invalidation in the crate builds its key here.

use chrono::Duration;
use serde::Deserialize;

use crate::cache::QueryKey;

/// The families of cached data. Each maps to a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
  HomeItems,
  Listings,
  Bookings,
  Offers,
  Notifications,
  Profile,
  SocietyName,
}

impl Namespace {
  pub const ALL: [Namespace; 7] = [
    Namespace::HomeItems,
    Namespace::Listings,
    Namespace::Bookings,
    Namespace::Offers,
    Namespace::Notifications,
    Namespace::Profile,
    Namespace::SocietyName,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::HomeItems => "home_items",
      Self::Listings => "listings",
      Self::Bookings => "bookings",
      Self::Offers => "offers",
      Self::Notifications => "notifications",
      Self::Profile => "profile",
      Self::SocietyName => "society_name",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|ns| ns.as_str() == s)
  }
}

/// Matches every key in the namespace.
impl QueryKey for Namespace {
  fn cache_key(&self) -> String {
    format!("{}_", self.as_str())
  }

  fn description(&self) -> String {
    format!("all {}", self.as_str())
  }
}

/// A namespace scoped to one user or society.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  namespace: Namespace,
  scope: String,
}

impl CacheKey {
  fn new(namespace: Namespace, scope: &str) -> Self {
    Self {
      namespace,
      scope: scope.to_string(),
    }
  }

  /// Items visible on a society's home feed.
  pub fn home_items(society_id: &str) -> Self {
    Self::new(Namespace::HomeItems, society_id)
  }

  /// A user's own listed items.
  pub fn listings(user_id: &str) -> Self {
    Self::new(Namespace::Listings, user_id)
  }

  /// Rentals a user has booked.
  pub fn bookings(user_id: &str) -> Self {
    Self::new(Namespace::Bookings, user_id)
  }

  /// Offers a user has sent.
  pub fn offers(user_id: &str) -> Self {
    Self::new(Namespace::Offers, user_id)
  }

  pub fn notifications(user_id: &str) -> Self {
    Self::new(Namespace::Notifications, user_id)
  }

  /// The society a user's profile belongs to.
  pub fn profile(user_id: &str) -> Self {
    Self::new(Namespace::Profile, user_id)
  }

  pub fn society_name(society_id: &str) -> Self {
    Self::new(Namespace::SocietyName, society_id)
  }
}

impl QueryKey for CacheKey {
  fn cache_key(&self) -> String {
    format!("{}_{}", self.namespace.as_str(), self.scope)
  }

  fn description(&self) -> String {
    format!("{} for {}", self.namespace.as_str(), self.scope)
  }
}

/// How long each class of cached data stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
  /// Volatile lists (feeds, offers, bookings)
  pub short_secs: i64,
  /// Default
  pub medium_secs: i64,
  /// Near-static values (society names, profile society)
  pub long_secs: i64,
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self {
      short_secs: 2 * 60,
      medium_secs: 5 * 60,
      long_secs: 30 * 60,
    }
  }
}

impl TtlPolicy {
  pub fn short(&self) -> Duration {
    Duration::seconds(self.short_secs)
  }

  pub fn medium(&self) -> Duration {
    Duration::seconds(self.medium_secs)
  }

  pub fn long(&self) -> Duration {
    Duration::seconds(self.long_secs)
  }
}
