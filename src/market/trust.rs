//! Reputation heuristic recomputed on every request.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use super::store::MarketStore;
use super::types::Rental;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Scoring constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
  pub baseline: i64,
  /// Subtracted for each started day a rental came back late
  pub late_penalty_per_day: i64,
  pub on_time_bonus: i64,
  pub per_listing_bonus: i64,
  /// Reported when the history can't be read
  pub fallback: u8,
}

impl Default for TrustPolicy {
  fn default() -> Self {
    Self {
      baseline: 100,
      late_penalty_per_day: 10,
      on_time_bonus: 5,
      per_listing_bonus: 2,
      fallback: 80,
    }
  }
}

impl TrustPolicy {
  /// Score a renter's completed rentals plus their listing count, clamped to 0..=100.
  ///
  /// Rentals without a recorded return don't count either way.
  pub fn score(&self, completed: &[Rental], items_owned: u32) -> u8 {
    let mut score = self.baseline;

    for rental in completed {
      let Some(returned_at) = rental.returned_at else {
        continue;
      };

      let late_ms = (returned_at - rental.end_time).num_milliseconds();
      if late_ms > 0 {
        let days_late = (late_ms + DAY_MS - 1) / DAY_MS;
        score -= self.late_penalty_per_day * days_late;
      } else {
        score += self.on_time_bonus;
      }
    }

    score += self.per_listing_bonus * i64::from(items_owned);
    score.clamp(0, 100) as u8
  }
}

pub struct TrustScoreEstimator {
  store: Arc<dyn MarketStore>,
  policy: TrustPolicy,
}

impl TrustScoreEstimator {
  pub fn new(store: Arc<dyn MarketStore>, policy: TrustPolicy) -> Self {
    Self { store, policy }
  }

  /// A user's trust score in 0..=100. Falls back to the policy's default
  /// score when the history can't be read.
  pub async fn calculate(&self, user_id: &str) -> u8 {
    match self.try_calculate(user_id).await {
      Ok(score) => score,
      Err(e) => {
        error!(user = %user_id, "Error calculating trust score: {}", e);
        self.policy.fallback.min(100)
      }
    }
  }

  async fn try_calculate(&self, user_id: &str) -> Result<u8> {
    let completed = self.store.completed_rentals_for_renter(user_id).await?;
    let items_owned = self.store.count_items_owned(user_id).await?;
    Ok(self.policy.score(&completed, items_owned))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::SqliteMarketStore;
  use crate::market::types::{NewItem, NewRental, RentalStatus};
  use chrono::{DateTime, Duration, Utc};

  fn completed(end: DateTime<Utc>, returned_at: Option<DateTime<Utc>>) -> Rental {
    Rental {
      id: "r".to_string(),
      item_id: "i".to_string(),
      renter_id: "u".to_string(),
      owner_id: "o".to_string(),
      final_price: 100,
      duration_hours: 24,
      start_time: end - Duration::hours(24),
      end_time: end,
      status: RentalStatus::Completed,
      is_insured: false,
      returned_at,
      created_at: end - Duration::hours(24),
    }
  }

  #[test]
  fn test_no_history_scores_baseline() {
    assert_eq!(TrustPolicy::default().score(&[], 0), 100);
  }

  #[test]
  fn test_partial_days_round_up() {
    let policy = TrustPolicy::default();
    let end = Utc::now();

    let late = completed(end, Some(end + Duration::hours(49)));
    assert_eq!(policy.score(&[late], 0), 70);

    let one_ms = completed(end, Some(end + Duration::milliseconds(1)));
    assert_eq!(policy.score(&[one_ms], 0), 90);
  }

  #[test]
  fn test_on_time_and_listing_bonuses_clamp() {
    let policy = TrustPolicy::default();
    let end = Utc::now();
    let on_time = completed(end, Some(end));
    let unreturned = completed(end, None);

    assert_eq!(policy.score(&[on_time.clone(), unreturned], 0), 100);

    let lenient = TrustPolicy { baseline: 50, ..policy };
    assert_eq!(lenient.score(&[on_time], 3), 61);

    let very_late = completed(end, Some(end + Duration::days(30)));
    assert_eq!(policy.score(&[very_late], 0), 0);
  }

  #[tokio::test]
  async fn test_three_days_late_with_two_listings() {
    let store = Arc::new(SqliteMarketStore::open_in_memory().unwrap());
    let now = Utc::now();

    for title in ["Ladder", "Projector"] {
      store
        .insert_item(NewItem {
          title: title.to_string(),
          description: None,
          category: "Electronics".to_string(),
          daily_rate: 50,
          market_price: None,
          images: vec![],
          owner_id: "u1".to_string(),
          society_id: "s1".to_string(),
        })
        .await
        .unwrap();
    }

    let end = now - Duration::days(5);
    let rental = store
      .insert_rental(NewRental {
        item_id: "someone-elses".to_string(),
        renter_id: "u1".to_string(),
        owner_id: "o2".to_string(),
        final_price: 100,
        duration_hours: 24,
        start_time: end - Duration::hours(24),
        end_time: end,
        is_insured: false,
      })
      .await
      .unwrap();
    store
      .complete_rental(&rental.id, Some(end + Duration::days(3)))
      .await
      .unwrap();

    let estimator = TrustScoreEstimator::new(store.clone(), TrustPolicy::default());
    assert_eq!(estimator.calculate("u1").await, 74);
    assert_eq!(estimator.calculate("nobody").await, 100);
  }
}
