/// Schema for the local marketplace database. Times are unix milliseconds.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS societies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    society_id TEXT
);

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    category TEXT NOT NULL,
    daily_rate INTEGER NOT NULL,
    market_price INTEGER,
    images TEXT NOT NULL DEFAULT '[]',
    owner_id TEXT NOT NULL,
    society_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'available',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_society ON items(society_id, created_at);
CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id);

CREATE TABLE IF NOT EXISTS offers (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    offered_price INTEGER NOT NULL,
    duration_hours INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offers_sender ON offers(sender_id);

CREATE TABLE IF NOT EXISTS rentals (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    renter_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    final_price INTEGER NOT NULL,
    duration_hours INTEGER NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    is_insured INTEGER NOT NULL DEFAULT 0,
    returned_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rentals_status_end ON rentals(status, end_time);
CREATE INDEX IF NOT EXISTS idx_rentals_renter ON rentals(renter_id);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    type TEXT NOT NULL,
    related_user_id TEXT,
    related_rental_id TEXT,
    related_offer_id TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_actioned INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_notifications_rental ON notifications(related_rental_id, type);

CREATE TABLE IF NOT EXISTS wallets (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL
);
"#;
