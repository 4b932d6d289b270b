//! Signed-in session context.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::market::{ReconcilerHandle, RentalReconciler};

/// Monotonic counter that tells feeds to reload past their cache.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
  tx: Arc<watch::Sender<u64>>,
}

impl Default for RefreshTrigger {
  fn default() -> Self {
    Self::new()
  }
}

impl RefreshTrigger {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(0);
    Self { tx: Arc::new(tx) }
  }

  /// Request a refresh, returning the new generation.
  pub fn bump(&self) -> u64 {
    let mut generation = 0;
    self.tx.send_modify(|g| {
      *g += 1;
      generation = *g;
    });
    generation
  }

  pub fn generation(&self) -> u64 {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.tx.subscribe()
  }
}

/// Who is signed in and where. Passed to whatever needs it; the cache and
/// reconciler never look at it.
#[derive(Debug, Clone)]
pub struct Session {
  pub user_id: String,
  pub society_id: Option<String>,
  /// Whether onboarding (name, society) is finished
  pub profile_complete: bool,
  pub refresh: RefreshTrigger,
}

impl Session {
  pub fn new(user_id: impl Into<String>, society_id: Option<String>, profile_complete: bool) -> Self {
    Self {
      user_id: user_id.into(),
      society_id,
      profile_complete,
      refresh: RefreshTrigger::new(),
    }
  }

  /// Start the background reconciler for this session.
  ///
  /// Nothing runs until the profile is complete. Dropping the returned
  /// handle stops the timer.
  pub fn activate(&self, reconciler: Arc<RentalReconciler>) -> Option<ReconcilerHandle> {
    if !self.profile_complete {
      return None;
    }

    info!(user = %self.user_id, "Starting rental expiration checker");
    Some(reconciler.start())
  }

  /// Ask every live feed to reload from the store.
  pub fn refresh_app(&self) -> u64 {
    self.refresh.bump()
  }
}
