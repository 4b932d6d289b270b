//! Notification dispatch and bookkeeping.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::store::{ChangeKind, Entity, MarketStore};
use super::types::{NewNotification, Notification};

/// Creates notifications on behalf of mutating flows and the reconciler.
///
/// Emission is best effort: a failed insert is logged and never fails the
/// flow that triggered it.
#[derive(Clone)]
pub struct Notifier {
  store: Arc<dyn MarketStore>,
}

impl Notifier {
  pub fn new(store: Arc<dyn MarketStore>) -> Self {
    Self { store }
  }

  /// Create a notification, returning it if the insert went through.
  pub async fn notify(&self, notification: NewNotification) -> Option<Notification> {
    let kind = notification.kind;
    match self.store.insert_notification(notification).await {
      Ok(created) => {
        debug!(id = %created.id, user = %created.user_id, %kind, "Notification created");
        Some(created)
      }
      Err(e) => {
        error!(%kind, "Error creating notification: {}", e);
        None
      }
    }
  }

  pub async fn unread_count(&self, user_id: &str) -> Result<u32> {
    self.store.unread_count(user_id).await
  }

  pub async fn mark_as_read(&self, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    self.store.mark_read(ids).await
  }

  pub async fn mark_as_actioned(&self, id: &str) -> Result<()> {
    self.store.mark_actioned(id).await
  }

  /// Call `on_notification` for every notification inserted for `user_id`
  /// until the returned subscription is dropped or unsubscribed.
  pub fn subscribe<F>(&self, user_id: &str, mut on_notification: F) -> Subscription
  where
    F: FnMut(Notification) + Send + 'static,
  {
    let mut changes = self.store.subscribe();
    let user_id = user_id.to_string();

    let task = tokio::spawn(async move {
      loop {
        let event = match changes.recv().await {
          Ok(event) => event,
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "Notification subscriber fell behind");
            continue;
          }
          Err(RecvError::Closed) => break,
        };

        if event.entity != Entity::Notification
          || event.kind != ChangeKind::Insert
          || event.user_id.as_deref() != Some(user_id.as_str())
        {
          continue;
        }

        match serde_json::from_value::<Notification>(event.record) {
          Ok(notification) => on_notification(notification),
          Err(e) => warn!(id = %event.id, "Malformed notification event: {}", e),
        }
      }
    });

    Subscription { task: Some(task) }
  }
}

/// Live realtime subscription. Dropping it unsubscribes.
pub struct Subscription {
  task: Option<JoinHandle<()>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    self.cancel();
  }

  fn cancel(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::SqliteMarketStore;
  use crate::market::types::NotificationKind;
  use std::time::Duration;
  use tokio::sync::mpsc;

  fn notifier() -> (Notifier, Arc<SqliteMarketStore>) {
    let store = Arc::new(SqliteMarketStore::open_in_memory().unwrap());
    (Notifier::new(store.clone()), store)
  }

  fn offer_request(user: &str) -> NewNotification {
    NewNotification::new(user, NotificationKind::OfferRequest, "New Offer Received", "₹90/day")
  }

  #[tokio::test]
  async fn test_notify_and_read_flags() {
    let (notifier, store) = notifier();
    let created = notifier.notify(offer_request("owner")).await.unwrap();

    assert_eq!(notifier.unread_count("owner").await.unwrap(), 1);
    notifier.mark_as_read(&[]).await.unwrap();
    notifier.mark_as_read(&[created.id.clone()]).await.unwrap();
    notifier.mark_as_actioned(&created.id).await.unwrap();

    assert_eq!(notifier.unread_count("owner").await.unwrap(), 0);
    let stored = store.notifications_for("owner", 10).await.unwrap();
    assert!(stored[0].is_actioned);
  }

  #[tokio::test]
  async fn test_subscription_filters_by_user_and_stops_on_drop() {
    let (notifier, _) = notifier();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = notifier.subscribe("owner", move |n| {
      let _ = tx.send(n.title);
    });
    // Let the subscriber task start listening
    tokio::task::yield_now().await;

    notifier.notify(offer_request("someone-else")).await.unwrap();
    notifier.notify(offer_request("owner")).await.unwrap();

    let title = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(title.as_deref(), Some("New Offer Received"));

    subscription.unsubscribe();
    notifier.notify(offer_request("owner")).await.unwrap();

    // The sender was dropped with the aborted task
    let after = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(after, None);
  }
}
