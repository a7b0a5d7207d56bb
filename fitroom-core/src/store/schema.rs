/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for fitroom's `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS fitroom_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Generation cost events (bounded trailing window)
CREATE TABLE IF NOT EXISTS cost_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    timestamp TEXT NOT NULL,
    model TEXT NOT NULL,
    cost_usd REAL NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cost_records_timestamp ON cost_records(timestamp);

-- Saved outfits (wardrobe)
CREATE TABLE IF NOT EXISTS saved_outfits (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    payload TEXT NOT NULL
);
";
