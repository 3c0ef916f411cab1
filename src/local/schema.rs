/// Schema for the offline store. Safe to run on every start.
pub const SCHEMA: &str = r#"
-- Flattened copy of canonical records plus sync state
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    country TEXT,
    percentage REAL,
    image_url TEXT,
    created_at TEXT,
    remote_updated_at TEXT,
    name TEXT,
    description TEXT,
    aroma TEXT,
    taste TEXT,
    finish TEXT,
    color TEXT,
    region TEXT,
    type TEXT,
    last_updated INTEGER NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'synced'
        CHECK (sync_status IN ('synced', 'pending', 'conflict'))
);

CREATE INDEX IF NOT EXISTS idx_records_last_updated ON records(last_updated DESC);
CREATE INDEX IF NOT EXISTS idx_records_sync_status ON records(sync_status);

-- Photos taken while offline, attached to a record
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    uri TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_record ON photos(record_id);

-- Single-row sync bookkeeping
CREATE TABLE IF NOT EXISTS sync_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync_time INTEGER
);
"#;

/// Column list shared by every record read, in `row_to_record` order.
pub const RECORD_COLUMNS: &str = "id, country, percentage, image_url, created_at, \
  remote_updated_at, name, description, aroma, taste, finish, color, region, type, \
  last_updated, sync_status";
