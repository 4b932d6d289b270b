//! SQLite implementation of the marketplace data store.

pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::market::store::{ChangeEvent, ChangeKind, Entity, MarketStore};
use crate::market::types::{
  Item, ItemStatus, NewItem, NewNotification, NewOffer, NewRental, Notification, NotificationKind,
  Offer, OfferStatus, Rental, RentalStatus,
};

/// Stores enum columns as their snake_case names.
macro_rules! sql_text_enum {
  ($($ty:ty),+ $(,)?) => {$(
    impl ToSql for $ty {
      fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
      }
    }

    impl FromSql for $ty {
      fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
          .as_str()?
          .parse()
          .map_err(|e| FromSqlError::Other(Box::new(e)))
      }
    }
  )+};
}

sql_text_enum!(ItemStatus, OfferStatus, RentalStatus, NotificationKind);

const ITEM_COLUMNS: &str = "id, title, description, category, daily_rate, market_price, images, \
                            owner_id, society_id, status, created_at";
const OFFER_COLUMNS: &str =
  "id, item_id, sender_id, receiver_id, offered_price, duration_hours, status, created_at";
const RENTAL_COLUMNS: &str = "id, item_id, renter_id, owner_id, final_price, duration_hours, \
                              start_time, end_time, status, is_insured, returned_at, created_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, type, related_user_id, \
                                    related_rental_id, related_offer_id, is_read, is_actioned, created_at";

/// Local marketplace database.
///
/// Every write is published on a broadcast channel so subscribers see the
/// same insert/update/delete stream a hosted realtime service would push.
pub struct SqliteMarketStore {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
  changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteMarketStore {
  /// Open or create the database at the given path
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let (changes, _) = broadcast::channel(256);
    let db = Self {
      conn: Mutex::new(conn),
      clock: Arc::new(SystemClock),
      changes,
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Use `clock` for record creation times.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("societyshare").join("market.db"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Register a society so profiles and items can point at it.
  pub fn insert_society(&self, id: &str, name: &str) -> Result<()> {
    self.execute(
      "INSERT OR REPLACE INTO societies (id, name) VALUES (?, ?)",
      params![id, name],
    )?;
    Ok(())
  }

  /// Current time at the precision rows are stored with.
  fn now(&self) -> DateTime<Utc> {
    self.clock.now().trunc_subsecs(3)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
    self
      .lock()?
      .execute(sql, params)
      .map_err(|e| eyre!("Failed to execute statement: {}", e))
  }

  fn query_all<T, P: Params>(
    &self,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params, map)
      .map_err(|e| eyre!("Failed to run query: {}", e))?
      .collect::<rusqlite::Result<Vec<T>>>()
      .map_err(|e| eyre!("Failed to read row: {}", e))?;

    Ok(rows)
  }

  fn query_one<T, P: Params>(
    &self,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Option<T>> {
    self
      .lock()?
      .query_row(sql, params, map)
      .optional()
      .map_err(|e| eyre!("Failed to run query: {}", e))
  }

  fn publish<T: Serialize>(
    &self,
    entity: Entity,
    kind: ChangeKind,
    id: &str,
    user_id: Option<&str>,
    record: &T,
  ) {
    let record = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
    // No subscribers is fine
    let _ = self.changes.send(ChangeEvent {
      entity,
      kind,
      id: id.to_string(),
      user_id: user_id.map(String::from),
      record,
    });
  }
}

fn new_id() -> String {
  Uuid::new_v4().to_string()
}

fn millis(t: DateTime<Utc>) -> i64 {
  t.timestamp_millis()
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let ms: i64 = row.get(idx)?;
  DateTime::from_timestamp_millis(ms).ok_or_else(|| {
    rusqlite::Error::FromSqlConversionFailure(
      idx,
      Type::Integer,
      format!("timestamp out of range: {}", ms).into(),
    )
  })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
  let images: String = row.get(6)?;
  let images = serde_json::from_str(&images)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

  Ok(Item {
    id: row.get(0)?,
    title: row.get(1)?,
    description: row.get(2)?,
    category: row.get(3)?,
    daily_rate: row.get(4)?,
    market_price: row.get(5)?,
    images,
    owner_id: row.get(7)?,
    society_id: row.get(8)?,
    status: row.get(9)?,
    created_at: time_at(row, 10)?,
  })
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<Offer> {
  Ok(Offer {
    id: row.get(0)?,
    item_id: row.get(1)?,
    sender_id: row.get(2)?,
    receiver_id: row.get(3)?,
    offered_price: row.get(4)?,
    duration_hours: row.get(5)?,
    status: row.get(6)?,
    created_at: time_at(row, 7)?,
  })
}

fn rental_from_row(row: &Row<'_>) -> rusqlite::Result<Rental> {
  let returned_at: Option<i64> = row.get(10)?;

  Ok(Rental {
    id: row.get(0)?,
    item_id: row.get(1)?,
    renter_id: row.get(2)?,
    owner_id: row.get(3)?,
    final_price: row.get(4)?,
    duration_hours: row.get(5)?,
    start_time: time_at(row, 6)?,
    end_time: time_at(row, 7)?,
    status: row.get(8)?,
    is_insured: row.get(9)?,
    returned_at: returned_at.and_then(DateTime::from_timestamp_millis),
    created_at: time_at(row, 11)?,
  })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
  Ok(Notification {
    id: row.get(0)?,
    user_id: row.get(1)?,
    title: row.get(2)?,
    message: row.get(3)?,
    kind: row.get(4)?,
    related_user_id: row.get(5)?,
    related_rental_id: row.get(6)?,
    related_offer_id: row.get(7)?,
    is_read: row.get(8)?,
    is_actioned: row.get(9)?,
    created_at: time_at(row, 10)?,
  })
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
  async fn insert_item(&self, new: NewItem) -> Result<Item> {
    let item = Item {
      id: new_id(),
      title: new.title,
      description: new.description,
      category: new.category,
      daily_rate: new.daily_rate,
      market_price: new.market_price,
      images: new.images,
      owner_id: new.owner_id,
      society_id: new.society_id,
      status: ItemStatus::Available,
      created_at: self.now(),
    };
    let images = serde_json::to_string(&item.images)
      .map_err(|e| eyre!("Failed to serialize images: {}", e))?;

    self.execute(
      &format!(
        "INSERT INTO items ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ITEM_COLUMNS
      ),
      params![
        item.id,
        item.title,
        item.description,
        item.category,
        item.daily_rate,
        item.market_price,
        images,
        item.owner_id,
        item.society_id,
        item.status,
        millis(item.created_at),
      ],
    )?;

    self.publish(Entity::Item, ChangeKind::Insert, &item.id, Some(&item.owner_id), &item);
    Ok(item)
  }

  async fn get_item(&self, id: &str) -> Result<Option<Item>> {
    self.query_one(
      &format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS),
      params![id],
      item_from_row,
    )
  }

  async fn delete_item(&self, id: &str) -> Result<()> {
    self.execute("DELETE FROM items WHERE id = ?", params![id])?;
    self.publish(
      Entity::Item,
      ChangeKind::Delete,
      id,
      None,
      &serde_json::json!({ "id": id }),
    );
    Ok(())
  }

  async fn set_item_status(&self, id: &str, status: ItemStatus) -> Result<()> {
    self.execute(
      "UPDATE items SET status = ? WHERE id = ?",
      params![status, id],
    )?;
    self.publish(
      Entity::Item,
      ChangeKind::Update,
      id,
      None,
      &serde_json::json!({ "id": id, "status": status }),
    );
    Ok(())
  }

  async fn items_in_society(&self, society_id: &str, exclude_rented: bool) -> Result<Vec<Item>> {
    let sql = format!(
      "SELECT {} FROM items WHERE society_id = ?1 AND (?2 = 0 OR status != 'rented')
       ORDER BY created_at DESC, rowid DESC",
      ITEM_COLUMNS
    );
    self.query_all(&sql, params![society_id, exclude_rented], item_from_row)
  }

  async fn items_owned_by(&self, owner_id: &str, society_id: Option<&str>) -> Result<Vec<Item>> {
    let sql = format!(
      "SELECT {} FROM items WHERE owner_id = ?1 AND (?2 IS NULL OR society_id = ?2)
       ORDER BY created_at DESC, rowid DESC",
      ITEM_COLUMNS
    );
    self.query_all(&sql, params![owner_id, society_id], item_from_row)
  }

  async fn count_items_owned(&self, owner_id: &str) -> Result<u32> {
    let count = self
      .query_one(
        "SELECT COUNT(*) FROM items WHERE owner_id = ?",
        params![owner_id],
        |row| row.get::<_, u32>(0),
      )?
      .unwrap_or(0);
    Ok(count)
  }

  async fn rented_items(&self) -> Result<Vec<Item>> {
    self.query_all(
      &format!("SELECT {} FROM items WHERE status = 'rented'", ITEM_COLUMNS),
      [],
      item_from_row,
    )
  }

  async fn insert_offer(&self, new: NewOffer) -> Result<Offer> {
    let offer = Offer {
      id: new_id(),
      item_id: new.item_id,
      sender_id: new.sender_id,
      receiver_id: new.receiver_id,
      offered_price: new.offered_price,
      duration_hours: new.duration_hours,
      status: OfferStatus::Pending,
      created_at: self.now(),
    };

    self.execute(
      &format!("INSERT INTO offers ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)", OFFER_COLUMNS),
      params![
        offer.id,
        offer.item_id,
        offer.sender_id,
        offer.receiver_id,
        offer.offered_price,
        offer.duration_hours,
        offer.status,
        millis(offer.created_at),
      ],
    )?;

    self.publish(Entity::Offer, ChangeKind::Insert, &offer.id, Some(&offer.receiver_id), &offer);
    Ok(offer)
  }

  async fn get_offer(&self, id: &str) -> Result<Option<Offer>> {
    self.query_one(
      &format!("SELECT {} FROM offers WHERE id = ?", OFFER_COLUMNS),
      params![id],
      offer_from_row,
    )
  }

  async fn set_offer_status(&self, id: &str, status: OfferStatus) -> Result<()> {
    self.execute(
      "UPDATE offers SET status = ? WHERE id = ?",
      params![status, id],
    )?;
    self.publish(
      Entity::Offer,
      ChangeKind::Update,
      id,
      None,
      &serde_json::json!({ "id": id, "status": status }),
    );
    Ok(())
  }

  async fn set_offer_terms(
    &self,
    id: &str,
    offered_price: i64,
    duration_hours: i64,
    status: OfferStatus,
  ) -> Result<()> {
    self.execute(
      "UPDATE offers SET offered_price = ?, duration_hours = ?, status = ? WHERE id = ?",
      params![offered_price, duration_hours, status, id],
    )?;
    self.publish(
      Entity::Offer,
      ChangeKind::Update,
      id,
      None,
      &serde_json::json!({
        "id": id,
        "offered_price": offered_price,
        "duration_hours": duration_hours,
        "status": status,
      }),
    );
    Ok(())
  }

  async fn offers_sent_by(&self, user_id: &str) -> Result<Vec<Offer>> {
    self.query_all(
      &format!(
        "SELECT {} FROM offers WHERE sender_id = ? AND status != 'completed'
         ORDER BY created_at DESC, rowid DESC",
        OFFER_COLUMNS
      ),
      params![user_id],
      offer_from_row,
    )
  }

  async fn insert_rental(&self, new: NewRental) -> Result<Rental> {
    let rental = Rental {
      id: new_id(),
      item_id: new.item_id,
      renter_id: new.renter_id,
      owner_id: new.owner_id,
      final_price: new.final_price,
      duration_hours: new.duration_hours,
      start_time: new.start_time.trunc_subsecs(3),
      end_time: new.end_time.trunc_subsecs(3),
      status: RentalStatus::Active,
      is_insured: new.is_insured,
      returned_at: None,
      created_at: self.now(),
    };

    self.execute(
      &format!(
        "INSERT INTO rentals ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        RENTAL_COLUMNS
      ),
      params![
        rental.id,
        rental.item_id,
        rental.renter_id,
        rental.owner_id,
        rental.final_price,
        rental.duration_hours,
        millis(rental.start_time),
        millis(rental.end_time),
        rental.status,
        rental.is_insured,
        Option::<i64>::None,
        millis(rental.created_at),
      ],
    )?;

    self.publish(Entity::Rental, ChangeKind::Insert, &rental.id, Some(&rental.renter_id), &rental);
    Ok(rental)
  }

  async fn get_rental(&self, id: &str) -> Result<Option<Rental>> {
    self.query_one(
      &format!("SELECT {} FROM rentals WHERE id = ?", RENTAL_COLUMNS),
      params![id],
      rental_from_row,
    )
  }

  async fn rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>> {
    self.query_all(
      &format!(
        "SELECT {} FROM rentals WHERE renter_id = ? ORDER BY created_at DESC, rowid DESC",
        RENTAL_COLUMNS
      ),
      params![renter_id],
      rental_from_row,
    )
  }

  async fn completed_rentals_for_renter(&self, renter_id: &str) -> Result<Vec<Rental>> {
    self.query_all(
      &format!(
        "SELECT {} FROM rentals WHERE renter_id = ? AND status = 'completed'",
        RENTAL_COLUMNS
      ),
      params![renter_id],
      rental_from_row,
    )
  }

  async fn active_rental_for_item(&self, item_id: &str) -> Result<Option<Rental>> {
    self.query_one(
      &format!(
        "SELECT {} FROM rentals WHERE item_id = ? AND status = 'active' LIMIT 1",
        RENTAL_COLUMNS
      ),
      params![item_id],
      rental_from_row,
    )
  }

  async fn expired_active_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>> {
    self.query_all(
      &format!(
        "SELECT {} FROM rentals WHERE status = 'active' AND end_time < ? ORDER BY end_time",
        RENTAL_COLUMNS
      ),
      params![millis(now)],
      rental_from_row,
    )
  }

  async fn active_rentals_ending_between(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Rental>> {
    self.query_all(
      &format!(
        "SELECT {} FROM rentals WHERE status = 'active' AND end_time > ? AND end_time < ?
         ORDER BY end_time",
        RENTAL_COLUMNS
      ),
      params![millis(from), millis(to)],
      rental_from_row,
    )
  }

  async fn complete_rental(&self, id: &str, returned_at: Option<DateTime<Utc>>) -> Result<bool> {
    let changed = self.execute(
      "UPDATE rentals SET status = 'completed', returned_at = COALESCE(?, returned_at)
       WHERE id = ? AND status = 'active'",
      params![returned_at.map(millis), id],
    )?;

    if changed > 0 {
      self.publish(
        Entity::Rental,
        ChangeKind::Update,
        id,
        None,
        &serde_json::json!({ "id": id, "status": RentalStatus::Completed }),
      );
    }
    Ok(changed > 0)
  }

  async fn extend_rental(
    &self,
    id: &str,
    new_end: DateTime<Utc>,
    extra_hours: i64,
    extra_price: i64,
  ) -> Result<bool> {
    let changed = self.execute(
      "UPDATE rentals SET end_time = ?, duration_hours = duration_hours + ?,
       final_price = final_price + ? WHERE id = ? AND status = 'active'",
      params![millis(new_end), extra_hours, extra_price, id],
    )?;

    if changed > 0 {
      self.publish(
        Entity::Rental,
        ChangeKind::Update,
        id,
        None,
        &serde_json::json!({ "id": id, "end_time": new_end }),
      );
    }
    Ok(changed > 0)
  }

  async fn insert_notification(&self, new: NewNotification) -> Result<Notification> {
    let notification = Notification {
      id: new_id(),
      user_id: new.user_id,
      title: new.title,
      message: new.message,
      kind: new.kind,
      related_user_id: new.related_user_id,
      related_rental_id: new.related_rental_id,
      related_offer_id: new.related_offer_id,
      is_read: false,
      is_actioned: false,
      created_at: self.now(),
    };

    self.execute(
      &format!(
        "INSERT INTO notifications ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        NOTIFICATION_COLUMNS
      ),
      params![
        notification.id,
        notification.user_id,
        notification.title,
        notification.message,
        notification.kind,
        notification.related_user_id,
        notification.related_rental_id,
        notification.related_offer_id,
        notification.is_read,
        notification.is_actioned,
        millis(notification.created_at),
      ],
    )?;

    self.publish(
      Entity::Notification,
      ChangeKind::Insert,
      &notification.id,
      Some(&notification.user_id),
      &notification,
    );
    Ok(notification)
  }

  async fn notifications_for(&self, user_id: &str, limit: u32) -> Result<Vec<Notification>> {
    self.query_all(
      &format!(
        "SELECT {} FROM notifications WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
        NOTIFICATION_COLUMNS
      ),
      params![user_id, limit],
      notification_from_row,
    )
  }

  async fn notification_exists(&self, rental_id: &str, kind: NotificationKind) -> Result<bool> {
    let exists = self
      .query_one(
        "SELECT EXISTS(SELECT 1 FROM notifications WHERE related_rental_id = ? AND type = ?)",
        params![rental_id, kind],
        |row| row.get::<_, bool>(0),
      )?
      .unwrap_or(false);
    Ok(exists)
  }

  async fn unread_count(&self, user_id: &str) -> Result<u32> {
    let count = self
      .query_one(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        params![user_id],
        |row| row.get::<_, u32>(0),
      )?
      .unwrap_or(0);
    Ok(count)
  }

  async fn mark_read(&self, ids: &[String]) -> Result<()> {
    for id in ids {
      self.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?",
        params![id],
      )?;
    }
    Ok(())
  }

  async fn mark_actioned(&self, id: &str) -> Result<()> {
    self.execute(
      "UPDATE notifications SET is_actioned = 1 WHERE id = ?",
      params![id],
    )?;
    self.publish(
      Entity::Notification,
      ChangeKind::Update,
      id,
      None,
      &serde_json::json!({ "id": id, "is_actioned": true }),
    );
    Ok(())
  }

  async fn delete_notifications(&self, ids: &[String]) -> Result<()> {
    for id in ids {
      self.execute("DELETE FROM notifications WHERE id = ?", params![id])?;
      self.publish(
        Entity::Notification,
        ChangeKind::Delete,
        id,
        None,
        &serde_json::json!({ "id": id }),
      );
    }
    Ok(())
  }

  async fn wallet_balance(&self, user_id: &str) -> Result<Option<i64>> {
    self.query_one(
      "SELECT balance FROM wallets WHERE user_id = ?",
      params![user_id],
      |row| row.get(0),
    )
  }

  async fn create_wallet(&self, user_id: &str, balance: i64) -> Result<i64> {
    self.execute(
      "INSERT INTO wallets (user_id, balance) VALUES (?, ?) ON CONFLICT(user_id) DO NOTHING",
      params![user_id, balance],
    )?;
    self
      .wallet_balance(user_id)
      .await?
      .ok_or_else(|| eyre!("Wallet not found"))
  }

  async fn debit_wallet(&self, user_id: &str, amount: i64) -> Result<bool> {
    let changed = self.execute(
      "UPDATE wallets SET balance = balance - ?1 WHERE user_id = ?2 AND balance >= ?1",
      params![amount, user_id],
    )?;

    if changed > 0 {
      self.publish(
        Entity::Wallet,
        ChangeKind::Update,
        user_id,
        Some(user_id),
        &serde_json::json!({ "user_id": user_id, "debited": amount }),
      );
    }
    Ok(changed > 0)
  }

  async fn credit_wallet(&self, user_id: &str, amount: i64) -> Result<()> {
    let changed = self.execute(
      "UPDATE wallets SET balance = balance + ?1 WHERE user_id = ?2",
      params![amount, user_id],
    )?;
    if changed == 0 {
      return Err(eyre!("Wallet not found for {}", user_id));
    }

    self.publish(
      Entity::Wallet,
      ChangeKind::Update,
      user_id,
      Some(user_id),
      &serde_json::json!({ "user_id": user_id, "credited": amount }),
    );
    Ok(())
  }

  async fn profile_society(&self, user_id: &str) -> Result<Option<String>> {
    let society = self.query_one(
      "SELECT society_id FROM profiles WHERE id = ?",
      params![user_id],
      |row| row.get::<_, Option<String>>(0),
    )?;
    Ok(society.flatten())
  }

  async fn set_profile_society(&self, user_id: &str, society_id: &str) -> Result<()> {
    self.execute(
      "INSERT INTO profiles (id, society_id) VALUES (?1, ?2)
       ON CONFLICT(id) DO UPDATE SET society_id = excluded.society_id",
      params![user_id, society_id],
    )?;
    self.publish(
      Entity::Profile,
      ChangeKind::Update,
      user_id,
      Some(user_id),
      &serde_json::json!({ "id": user_id, "society_id": society_id }),
    );
    Ok(())
  }

  async fn society_name(&self, society_id: &str) -> Result<Option<String>> {
    self.query_one(
      "SELECT name FROM societies WHERE id = ?",
      params![society_id],
      |row| row.get(0),
    )
  }

  fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.changes.subscribe()
  }
}
