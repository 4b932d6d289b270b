//! Background reconciliation of rental lifecycles against the wall clock.
//!
//! There is no server-side scheduler: rentals whose end time has passed are
//! completed, and their items released, by whichever session runs a pass.
//! Every pass is idempotent. The expiry predicate is `status = active AND
//! end_time < now` for both the notifying and the quiet variant.

use chrono::Duration;
use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::notify::Notifier;
use super::store::MarketStore;
use super::types::{Item, ItemStatus, NewNotification, NotificationKind, Rental};
use crate::clock::Clock;

/// Timing of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
  /// Seconds between passes
  pub interval_secs: u64,
  /// How far ahead of expiry renters get an "expiring soon" warning
  pub expiring_window_mins: i64,
}

impl Default for ReconcilerConfig {
  fn default() -> Self {
    Self {
      interval_secs: 60,
      expiring_window_mins: 120,
    }
  }
}

impl ReconcilerConfig {
  pub fn interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn expiring_window(&self) -> Duration {
    Duration::minutes(self.expiring_window_mins)
  }
}

/// Outcome of one expire pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpireReport {
  /// Rentals this pass moved to completed
  pub completed: Vec<String>,
  /// Rentals another writer completed first
  pub skipped: usize,
  /// Rentals whose writes failed part way
  pub failed: usize,
}

pub struct RentalReconciler {
  store: Arc<dyn MarketStore>,
  notifier: Notifier,
  clock: Arc<dyn Clock>,
  config: ReconcilerConfig,
}

impl RentalReconciler {
  pub fn new(
    store: Arc<dyn MarketStore>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
  ) -> Self {
    Self {
      store,
      notifier,
      clock,
      config,
    }
  }

  /// Complete expired rentals, free their items and tell both parties.
  pub async fn expire_pass(&self) -> Result<ExpireReport> {
    self.expire(true).await
  }

  /// Complete expired rentals and free their items without notifying anyone.
  ///
  /// Run before reading the home feed so no item shows as rented past its
  /// rental's end.
  pub async fn complete_expired_rentals(&self) -> Result<ExpireReport> {
    self.expire(false).await
  }

  async fn expire(&self, notify: bool) -> Result<ExpireReport> {
    let now = self.clock.now();
    let expired = self.store.expired_active_rentals(now).await?;

    let mut report = ExpireReport::default();
    if expired.is_empty() {
      return Ok(report);
    }

    info!(count = expired.len(), "Found expired rentals to process");

    for rental in expired {
      match self.expire_rental(&rental, notify).await {
        Ok(true) => report.completed.push(rental.id),
        Ok(false) => report.skipped += 1,
        Err(e) => {
          error!(rental = %rental.id, "Error handling expired rental: {}", e);
          report.failed += 1;
        }
      }
    }

    Ok(report)
  }

  /// Returns false if the rental was no longer active.
  async fn expire_rental(&self, rental: &Rental, notify: bool) -> Result<bool> {
    if !self.store.complete_rental(&rental.id, None).await? {
      debug!(rental = %rental.id, "Rental already completed elsewhere");
      return Ok(false);
    }

    if let Err(e) = self
      .store
      .set_item_status(&rental.item_id, ItemStatus::Available)
      .await
    {
      warn!(
        rental = %rental.id,
        item = %rental.item_id,
        "Rental completed but item is still marked rented: {}",
        e
      );
      return Err(e);
    }

    if notify {
      let title = self.item_title(&rental.item_id).await;

      self
        .notifier
        .notify(
          NewNotification::new(
            &rental.owner_id,
            NotificationKind::RentalExpiredOwner,
            "Rental Period Ended",
            format!(
              "The rental period for \"{}\" has ended. Please collect your item from the renter.",
              title
            ),
          )
          .about_user(&rental.renter_id)
          .about_rental(&rental.id),
        )
        .await;

      self
        .notifier
        .notify(
          NewNotification::new(
            &rental.renter_id,
            NotificationKind::RentalExpiredRenter,
            "Rental Period Ended",
            format!(
              "Your rental period for \"{}\" has ended. Please return the item or extend the rental.",
              title
            ),
          )
          .about_user(&rental.owner_id)
          .about_rental(&rental.id),
        )
        .await;
    }

    info!(rental = %rental.id, item = %rental.item_id, "Completed expired rental");
    Ok(true)
  }

  /// Warn renters whose rental ends within the configured window, once per rental.
  ///
  /// Returns the number of warnings sent. Two concurrent passes may both
  /// warn about the same rental; a duplicate warning is harmless.
  pub async fn expiring_soon_pass(&self) -> Result<usize> {
    let now = self.clock.now();
    let window = self.config.expiring_window();
    let expiring = self
      .store
      .active_rentals_ending_between(now, now + window)
      .await?;

    let mut sent = 0;
    for rental in expiring {
      if self
        .store
        .notification_exists(&rental.id, NotificationKind::RentalExpiringSoon)
        .await?
      {
        continue;
      }

      let title = self.item_title(&rental.item_id).await;
      let warned = self
        .notifier
        .notify(
          NewNotification::new(
            &rental.renter_id,
            NotificationKind::RentalExpiringSoon,
            "Rental Expiring Soon",
            format!(
              "Your rental for \"{}\" will expire in less than {}. Consider extending if needed.",
              title,
              describe_window(window)
            ),
          )
          .about_user(&rental.owner_id)
          .about_rental(&rental.id),
        )
        .await;

      if warned.is_some() {
        sent += 1;
      }
    }

    Ok(sent)
  }

  /// Items marked rented with no active rental behind them.
  ///
  /// These are left by an expire pass that completed a rental but failed to
  /// free its item. They are reported, not repaired.
  pub async fn audit_orphaned_items(&self) -> Result<Vec<Item>> {
    let mut orphaned = Vec::new();

    for item in self.store.rented_items().await? {
      if self.store.active_rental_for_item(&item.id).await?.is_none() {
        warn!(item = %item.id, title = %item.title, "Item is rented with no active rental");
        orphaned.push(item);
      }
    }

    Ok(orphaned)
  }

  /// Run both passes, logging instead of propagating failures.
  pub async fn tick(&self) {
    if let Err(e) = self.expire_pass().await {
      error!("Error checking expired rentals: {}", e);
    }
    if let Err(e) = self.expiring_soon_pass().await {
      error!("Error checking expiring rentals: {}", e);
    }
  }

  /// Run [`Self::tick`] now and then every interval until the handle is
  /// stopped or dropped.
  pub fn start(self: Arc<Self>) -> ReconcilerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let period = self.config.interval();

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          // The first tick completes immediately
          _ = ticker.tick() => self.tick().await,
        }
      }
      debug!("Rental expiration checker stopped");
    });

    info!(interval_secs = period.as_secs(), "Rental expiration checker started");
    ReconcilerHandle {
      shutdown: Some(shutdown_tx),
      task: Some(task),
    }
  }

  async fn item_title(&self, item_id: &str) -> String {
    match self.store.get_item(item_id).await {
      Ok(Some(item)) => item.title,
      _ => "your item".to_string(),
    }
  }
}

fn describe_window(window: Duration) -> String {
  let minutes = window.num_minutes();
  if minutes % 60 == 0 {
    let hours = minutes / 60;
    format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
  } else {
    format!("{} minutes", minutes)
  }
}

/// Teardown handle for the periodic reconciler. Dropping it stops the timer.
pub struct ReconcilerHandle {
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
  /// Stop the timer and wait for an in-flight pass to finish.
  pub async fn stop(mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }

  pub fn is_running(&self) -> bool {
    self.task.as_ref().is_some_and(|t| !t.is_finished())
  }
}

impl Drop for ReconcilerHandle {
  fn drop(&mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
  }
}
