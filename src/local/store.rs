//! Offline mirror of catalog records.
//!
//! The store works on an in-memory SQLite database. The whole database image
//! is loaded from disk on [`LocalStore::initialize`] and written back after
//! every mutation (to a temp file, then renamed over the old image), so each
//! write is durable and all-or-nothing across restarts. The cost of a write
//! grows with the size of the whole database.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::backup::Progress;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::schema::{RECORD_COLUMNS, SCHEMA};
use crate::catalog::types::{CanonicalRecord, TextFields};

/// Whether a local record matches what the backend has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
  /// Same as the last known remote state
  Synced,
  /// Changed locally, not yet confirmed written to the backend
  Pending,
  /// Changed locally while the backend copy changed too
  Conflict,
}

impl SyncStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      SyncStatus::Synced => "synced",
      SyncStatus::Pending => "pending",
      SyncStatus::Conflict => "conflict",
    }
  }
}

impl fmt::Display for SyncStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "synced" => Ok(SyncStatus::Synced),
      "pending" => Ok(SyncStatus::Pending),
      "conflict" => Ok(SyncStatus::Conflict),
      other => Err(format!("unknown sync status '{}'", other)),
    }
  }
}

/// A record as kept offline.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
  pub record: CanonicalRecord,
  /// Epoch millis of the last local write
  pub last_updated: i64,
  pub sync_status: SyncStatus,
}

/// Optional conditions for [`LocalStore::query`]; unset fields match all.
#[derive(Debug, Clone, Default)]
pub struct LocalFilter {
  /// Substring of name, region, type or country
  pub search: Option<String>,
  pub country: Option<String>,
  pub kind: Option<String>,
  pub sync_status: Option<SyncStatus>,
}

impl LocalFilter {
  pub fn with_status(status: SyncStatus) -> Self {
    Self {
      sync_status: Some(status),
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
  pub id: i64,
  pub record_id: i64,
  pub uri: String,
  pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalStats {
  pub total: u64,
  pub pending: u64,
  pub conflicts: u64,
  pub photos: u64,
  pub last_sync: Option<DateTime<Utc>>,
}

/// Durable, queryable offline store.
pub struct LocalStore {
  image_path: PathBuf,
  conn: Mutex<Option<Connection>>,
}

/// Make `term` match literally inside a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
  let mut escaped = String::with_capacity(term.len());
  for c in term.chars() {
    if matches!(c, '\\' | '%' | '_') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

fn to_sql_time(value: &Option<DateTime<Utc>>) -> Option<String> {
  value.map(|dt| dt.to_rfc3339())
}

fn from_sql_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let raw: Option<String> = row.get(idx)?;
  raw
    .map(|s| {
      DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LocalRecord> {
  let status: String = row.get(15)?;
  let sync_status = status
    .parse::<SyncStatus>()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Text, e.into()))?;

  Ok(LocalRecord {
    record: CanonicalRecord {
      id: row.get(0)?,
      country: row.get(1)?,
      percentage: row.get(2)?,
      image_url: row.get(3)?,
      created_at: from_sql_time(row, 4)?,
      updated_at: from_sql_time(row, 5)?,
      text: TextFields {
        name: row.get(6)?,
        description: row.get(7)?,
        aroma: row.get(8)?,
        taste: row.get(9)?,
        finish: row.get(10)?,
        color: row.get(11)?,
        region: row.get(12)?,
        kind: row.get(13)?,
      },
    },
    last_updated: row.get(14)?,
    sync_status,
  })
}

const UPSERT_RECORD: &str = "INSERT INTO records (id, country, percentage, image_url, created_at,
    remote_updated_at, name, description, aroma, taste, finish, color, region, type,
    last_updated, sync_status)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
  ON CONFLICT(id) DO UPDATE SET
    country = excluded.country,
    percentage = excluded.percentage,
    image_url = excluded.image_url,
    created_at = excluded.created_at,
    remote_updated_at = excluded.remote_updated_at,
    name = excluded.name,
    description = excluded.description,
    aroma = excluded.aroma,
    taste = excluded.taste,
    finish = excluded.finish,
    color = excluded.color,
    region = excluded.region,
    type = excluded.type,
    last_updated = excluded.last_updated,
    sync_status = excluded.sync_status";

/// Write `record` with the given status. With `keep_local_changes`, rows that
/// are pending or in conflict are left alone. Returns rows changed.
fn upsert_record(
  conn: &Connection,
  record: &CanonicalRecord,
  status: SyncStatus,
  keep_local_changes: bool,
) -> Result<usize> {
  let sql = if keep_local_changes {
    format!("{} WHERE records.sync_status = 'synced'", UPSERT_RECORD)
  } else {
    UPSERT_RECORD.to_string()
  };
  let text = &record.text;

  conn
    .execute(
      &sql,
      params![
        record.id,
        record.country,
        record.percentage,
        record.image_url,
        to_sql_time(&record.created_at),
        to_sql_time(&record.updated_at),
        text.name,
        text.description,
        text.aroma,
        text.taste,
        text.finish,
        text.color,
        text.region,
        text.kind,
        now_millis(),
        status.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store record {}: {}", record.id, e))
}

impl LocalStore {
  /// Store whose image lives at `<dir>/<storage_key>.sqlite`.
  pub fn new(dir: impl AsRef<Path>, storage_key: &str) -> Self {
    Self {
      image_path: dir.as_ref().join(format!("{}.sqlite", storage_key)),
      conn: Mutex::new(None),
    }
  }

  pub fn image_path(&self) -> &Path {
    &self.image_path
  }

  /// Load the persisted image, or create an empty schema if there is none.
  ///
  /// Idempotent: later calls are no-ops once this has succeeded.
  pub fn initialize(&self) -> Result<()> {
    let mut guard = self.lock()?;
    if guard.is_some() {
      return Ok(());
    }
    *guard = Some(self.load_image()?);
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn load_image(&self) -> Result<Connection> {
    let mut conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open local database: {}", e))?;

    let existed = self.image_path.exists();
    if existed {
      conn
        .restore(DatabaseName::Main, &self.image_path, None::<fn(Progress)>)
        .map_err(|e| {
          eyre!(
            "Failed to load local database image {}: {}",
            self.image_path.display(),
            e
          )
        })?;
    }

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run local migrations: {}", e))?;
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    if existed {
      info!(path = %self.image_path.display(), "Loaded local database image");
    } else {
      self.persist(&conn)?;
      info!(path = %self.image_path.display(), "Created local database");
    }
    Ok(conn)
  }

  /// Write the full image next to the old one, then swap it in.
  fn persist(&self, conn: &Connection) -> Result<()> {
    if let Some(parent) = self.image_path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create local data directory: {}", e))?;
    }

    let tmp = self.image_path.with_extension("sqlite.tmp");
    conn
      .backup(DatabaseName::Main, &tmp, None::<fn(Progress)>)
      .map_err(|e| eyre!("Failed to write local database image: {}", e))?;
    std::fs::rename(&tmp, &self.image_path)
      .map_err(|e| eyre!("Failed to replace local database image: {}", e))?;

    debug!(path = %self.image_path.display(), "Persisted local database image");
    Ok(())
  }

  fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
    self.initialize()?;
    let guard = self.lock()?;
    let conn = guard
      .as_ref()
      .ok_or_else(|| eyre!("Local database not initialized"))?;
    f(conn)
  }

  /// Run `f` in a transaction, then persist the image. If the image cannot
  /// be written the change is dropped from memory too.
  fn write<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
    self.initialize()?;
    let mut guard = self.lock()?;
    let conn = guard
      .as_ref()
      .ok_or_else(|| eyre!("Local database not initialized"))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let result = f(&tx)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    if let Err(e) = self.persist(conn) {
      // memory is ahead of the image; reload the image on next access
      warn!(path = %self.image_path.display(), error = %e, "Dropping unpersisted local changes");
      *guard = None;
      return Err(e);
    }
    Ok(result)
  }

  /// Upsert a record as it is on the backend (`synced`).
  pub fn insert(&self, record: &CanonicalRecord) -> Result<()> {
    self.write(|conn| upsert_record(conn, record, SyncStatus::Synced, false))?;
    Ok(())
  }

  /// Store a batch of backend records, skipping any with unsynced local
  /// changes. Returns how many were written.
  pub fn store_remote(&self, records: &[CanonicalRecord]) -> Result<usize> {
    self.write(|conn| {
      let mut written = 0;
      for record in records {
        written += upsert_record(conn, record, SyncStatus::Synced, true)?;
      }
      Ok(written)
    })
  }

  /// Upsert a locally edited record as `pending`.
  pub fn save_pending(&self, record: &CanonicalRecord) -> Result<()> {
    self.write(|conn| upsert_record(conn, record, SyncStatus::Pending, false))?;
    Ok(())
  }

  /// Upsert a locally edited record that is known to clash with the backend.
  pub fn save_conflict(&self, record: &CanonicalRecord) -> Result<()> {
    self.write(|conn| upsert_record(conn, record, SyncStatus::Conflict, false))?;
    Ok(())
  }

  pub fn get_by_id(&self, id: i64) -> Result<Option<LocalRecord>> {
    self.read(|conn| {
      conn
        .query_row(
          &format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS),
          params![id],
          row_to_record,
        )
        .optional()
        .map_err(|e| eyre!("Failed to read record {}: {}", id, e))
    })
  }

  /// Records matching `filter`, most recently updated first.
  pub fn query(
    &self,
    filter: &LocalFilter,
    limit: Option<u32>,
    offset: Option<u32>,
  ) -> Result<Vec<LocalRecord>> {
    let mut sql = format!("SELECT {} FROM records WHERE 1=1", RECORD_COLUMNS);
    let mut values: Vec<Value> = Vec::new();

    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
      sql.push_str(concat!(
        r" AND (name LIKE ? ESCAPE '\' OR region LIKE ? ESCAPE '\'",
        r" OR type LIKE ? ESCAPE '\' OR country LIKE ? ESCAPE '\')"
      ));
      let pattern = format!("%{}%", escape_like(term));
      values.extend(std::iter::repeat(Value::Text(pattern)).take(4));
    }
    if let Some(country) = &filter.country {
      sql.push_str(" AND country = ?");
      values.push(Value::Text(country.clone()));
    }
    if let Some(kind) = &filter.kind {
      sql.push_str(" AND type = ?");
      values.push(Value::Text(kind.clone()));
    }
    if let Some(status) = filter.sync_status {
      sql.push_str(" AND sync_status = ?");
      values.push(Value::Text(status.as_str().to_string()));
    }

    sql.push_str(" ORDER BY last_updated DESC, id DESC LIMIT ? OFFSET ?");
    values.push(Value::Integer(limit.map(i64::from).unwrap_or(-1)));
    values.push(Value::Integer(offset.map(i64::from).unwrap_or(0)));

    self.read(|conn| {
      let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let records = stmt
        .query_map(params_from_iter(values.iter()), row_to_record)
        .map_err(|e| eyre!("Failed to query records: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read record row: {}", e))?;
      Ok(records)
    })
  }

  fn set_status(&self, id: i64, status: SyncStatus, touch: bool) -> Result<bool> {
    self.write(|conn| {
      let changed = if touch {
        conn.execute(
          "UPDATE records SET sync_status = ?1, last_updated = ?2 WHERE id = ?3",
          params![status.as_str(), now_millis(), id],
        )
      } else {
        conn.execute(
          "UPDATE records SET sync_status = ?1 WHERE id = ?2",
          params![status.as_str(), id],
        )
      }
      .map_err(|e| eyre!("Failed to update sync status of {}: {}", id, e))?;
      Ok(changed > 0)
    })
  }

  /// Flag a record as changed locally and not yet written back.
  /// Returns `false` if there is no such record.
  pub fn mark_as_updated(&self, id: i64) -> Result<bool> {
    self.set_status(id, SyncStatus::Pending, true)
  }

  /// Clear pending state after a confirmed remote write.
  #[allow(dead_code)]
  pub fn mark_as_synced(&self, id: i64) -> Result<bool> {
    self.set_status(id, SyncStatus::Synced, false)
  }

  pub fn mark_as_conflict(&self, id: i64) -> Result<bool> {
    self.set_status(id, SyncStatus::Conflict, false)
  }

  /// Queue of records a sync has to push.
  pub fn get_pending_sync(&self) -> Result<Vec<LocalRecord>> {
    self.query(&LocalFilter::with_status(SyncStatus::Pending), None, None)
  }

  pub fn get_conflicts(&self) -> Result<Vec<LocalRecord>> {
    self.query(&LocalFilter::with_status(SyncStatus::Conflict), None, None)
  }

  pub fn delete(&self, id: i64) -> Result<bool> {
    self.write(|conn| {
      let changed = conn
        .execute("DELETE FROM records WHERE id = ?1", params![id])
        .map_err(|e| eyre!("Failed to delete record {}: {}", id, e))?;
      Ok(changed > 0)
    })
  }

  /// Attach a photo to an existing record.
  pub fn add_photo(&self, record_id: i64, uri: &str) -> Result<i64> {
    self.write(|conn| {
      conn
        .execute(
          "INSERT INTO photos (record_id, uri, created_at) VALUES (?1, ?2, ?3)",
          params![record_id, uri, now_millis()],
        )
        .map_err(|e| eyre!("Failed to add photo to record {}: {}", record_id, e))?;
      Ok(conn.last_insert_rowid())
    })
  }

  pub fn photos_for(&self, record_id: i64) -> Result<Vec<Photo>> {
    self.read(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT id, record_id, uri, created_at FROM photos
           WHERE record_id = ?1 ORDER BY created_at, id",
        )
        .map_err(|e| eyre!("Failed to prepare photo query: {}", e))?;
      let photos = stmt
        .query_map(params![record_id], |row| {
          Ok(Photo {
            id: row.get(0)?,
            record_id: row.get(1)?,
            uri: row.get(2)?,
            created_at: row.get(3)?,
          })
        })
        .map_err(|e| eyre!("Failed to query photos: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read photo row: {}", e))?;
      Ok(photos)
    })
  }

  pub fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
    self.write(|conn| {
      conn
        .execute(
          "INSERT INTO sync_metadata (id, last_sync_time) VALUES (1, ?1)
           ON CONFLICT(id) DO UPDATE SET last_sync_time = excluded.last_sync_time",
          params![at.timestamp_millis()],
        )
        .map_err(|e| eyre!("Failed to record sync time: {}", e))?;
      Ok(())
    })
  }

  pub fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
    self.read(|conn| {
      let millis: Option<Option<i64>> = conn
        .query_row(
          "SELECT last_sync_time FROM sync_metadata WHERE id = 1",
          [],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read sync time: {}", e))?;
      Ok(
        millis
          .flatten()
          .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
      )
    })
  }

  pub fn get_stats(&self) -> Result<LocalStats> {
    let last_sync = self.get_last_sync_time()?;
    self.read(|conn| {
      let (total, pending, conflicts): (i64, i64, i64) = conn
        .query_row(
          "SELECT COUNT(*),
                  COALESCE(SUM(sync_status = 'pending'), 0),
                  COALESCE(SUM(sync_status = 'conflict'), 0)
           FROM records",
          [],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| eyre!("Failed to count records: {}", e))?;
      let photos: i64 = conn
        .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count photos: {}", e))?;

      Ok(LocalStats {
        total: total as u64,
        pending: pending as u64,
        conflicts: conflicts as u64,
        photos: photos as u64,
        last_sync,
      })
    })
  }

  /// Remove every record, photo and sync marker.
  pub fn clear_database(&self) -> Result<()> {
    self.write(|conn| {
      conn
        .execute_batch(
          "DELETE FROM photos;
           DELETE FROM records;
           DELETE FROM sync_metadata;",
        )
        .map_err(|e| eyre!("Failed to clear local database: {}", e))
    })?;
    info!("Cleared local database");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tempfile::TempDir;

  fn store() -> (TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), "test_db");
    (dir, store)
  }

  fn record(id: i64, name: &str) -> CanonicalRecord {
    CanonicalRecord {
      id,
      country: Some("Scotland".into()),
      percentage: Some(43.2),
      image_url: Some(format!("https://img.example/{}.jpg", id)),
      created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
      updated_at: Some(Utc.timestamp_millis_opt(1_717_000_000_123).unwrap()),
      text: TextFields {
        name: Some(name.into()),
        description: Some("Rich and fruity".into()),
        aroma: Some("sherry".into()),
        taste: None,
        finish: Some("long".into()),
        color: Some("amber".into()),
        region: Some("Speyside".into()),
        kind: Some("Single Malt".into()),
      },
    }
  }

  // last_updated has millisecond resolution
  fn tick() {
    std::thread::sleep(Duration::from_millis(3));
  }

  #[test]
  fn test_insert_then_get_round_trips_every_field() {
    let (_dir, store) = store();
    let input = record(1, "Macallan 12");
    store.insert(&input).unwrap();

    let local = store.get_by_id(1).unwrap().unwrap();
    assert_eq!(local.record, input);
    assert_eq!(local.sync_status, SyncStatus::Synced);
  }

  #[test]
  fn test_sync_status_lifecycle() {
    let (_dir, store) = store();
    store.insert(&record(1, "Glenfarclas 15")).unwrap();

    assert!(store.mark_as_updated(1).unwrap());
    assert_eq!(
      store.get_by_id(1).unwrap().unwrap().sync_status,
      SyncStatus::Pending
    );
    let pending = store.get_pending_sync().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record.id, 1);

    assert!(store.mark_as_synced(1).unwrap());
    assert_eq!(
      store.get_by_id(1).unwrap().unwrap().sync_status,
      SyncStatus::Synced
    );
    assert!(store.get_pending_sync().unwrap().is_empty());

    assert!(!store.mark_as_updated(404).unwrap());
  }

  #[test]
  fn test_initialize_is_idempotent() {
    let (_dir, store) = store();
    store.initialize().unwrap();
    store.insert(&record(1, "Aberlour")).unwrap();
    store.initialize().unwrap();
    assert!(store.get_by_id(1).unwrap().is_some());
  }

  #[test]
  fn test_image_survives_reopen() {
    let (dir, store) = store();
    store.insert(&record(1, "Lagavulin 16")).unwrap();
    store.mark_as_updated(1).unwrap();
    let synced_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    store.set_last_sync_time(synced_at).unwrap();
    drop(store);

    let reopened = LocalStore::new(dir.path(), "test_db");
    let local = reopened.get_by_id(1).unwrap().unwrap();
    assert_eq!(local.record.text.name.as_deref(), Some("Lagavulin 16"));
    assert_eq!(local.sync_status, SyncStatus::Pending);
    assert_eq!(reopened.get_last_sync_time().unwrap(), Some(synced_at));
  }

  #[test]
  fn test_no_temp_image_left_behind() {
    let (dir, store) = store();
    store.insert(&record(1, "Oban 14")).unwrap();
    assert!(store.image_path().exists());
    assert!(!dir.path().join("test_db.sqlite.tmp").exists());
  }

  #[test]
  fn test_corrupted_image_is_reported() {
    let (dir, store) = store();
    std::fs::write(dir.path().join("test_db.sqlite"), b"definitely not sqlite").unwrap();
    assert!(store.initialize().is_err());
  }

  #[test]
  fn test_query_orders_by_last_updated_desc() {
    let (_dir, store) = store();
    store.insert(&record(1, "Ardbeg")).unwrap();
    tick();
    store.insert(&record(2, "Bowmore")).unwrap();
    tick();
    store.insert(&record(3, "Caol Ila")).unwrap();
    tick();
    store.mark_as_updated(1).unwrap();

    let ids: Vec<i64> = store
      .query(&LocalFilter::default(), None, None)
      .unwrap()
      .iter()
      .map(|r| r.record.id)
      .collect();
    assert_eq!(ids, vec![1, 3, 2]);

    let page: Vec<i64> = store
      .query(&LocalFilter::default(), Some(1), Some(1))
      .unwrap()
      .iter()
      .map(|r| r.record.id)
      .collect();
    assert_eq!(page, vec![3]);
  }

  #[test]
  fn test_query_filters() {
    let (_dir, store) = store();
    store.insert(&record(1, "Ardbeg Uigeadail")).unwrap();
    let mut bourbon = record(2, "Buffalo Trace");
    bourbon.country = Some("USA".into());
    bourbon.text.kind = Some("Bourbon".into());
    store.insert(&bourbon).unwrap();

    let search = LocalFilter {
      search: Some("uige".into()),
      ..Default::default()
    };
    let found = store.query(&search, None, None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].record.id, 1);

    let by_country = LocalFilter {
      country: Some("USA".into()),
      ..Default::default()
    };
    assert_eq!(store.query(&by_country, None, None).unwrap()[0].record.id, 2);

    let by_kind = LocalFilter {
      kind: Some("Single Malt".into()),
      ..Default::default()
    };
    assert_eq!(store.query(&by_kind, None, None).unwrap()[0].record.id, 1);
  }

  #[test]
  fn test_search_treats_wildcards_literally() {
    let (_dir, store) = store();
    store.insert(&record(1, "Glen Garioch 100% Cask")).unwrap();
    store.insert(&record(2, "Glen Garioch 1000")).unwrap();
    store.insert(&record(3, "Cask_Strength")).unwrap();
    store.insert(&record(4, "Cask Strength")).unwrap();

    let ids = |term: &str| -> Vec<i64> {
      let filter = LocalFilter {
        search: Some(term.into()),
        ..Default::default()
      };
      store
        .query(&filter, None, None)
        .unwrap()
        .iter()
        .map(|r| r.record.id)
        .collect()
    };
    assert_eq!(ids("100%"), vec![1]);
    assert_eq!(ids("k_s"), vec![3]);
    assert!(ids("\\").is_empty());
  }

  #[test]
  fn test_failed_persist_drops_the_change() {
    let (dir, store) = store();
    store.insert(&record(1, "Balvenie 12")).unwrap();

    // a directory in the way of the temp image makes the backup fail
    let blocker = dir.path().join("test_db.sqlite.tmp");
    std::fs::create_dir(&blocker).unwrap();
    assert!(store.insert(&record(1, "Balvenie 14")).is_err());
    std::fs::remove_dir(&blocker).unwrap();

    let local = store.get_by_id(1).unwrap().unwrap();
    assert_eq!(local.record.text.name.as_deref(), Some("Balvenie 12"));
  }

  #[test]
  fn test_save_conflict_keeps_the_edit_flagged() {
    let (_dir, store) = store();
    store.insert(&record(1, "Dalmore 12")).unwrap();
    store.save_conflict(&record(1, "Dalmore 12 (mine)")).unwrap();

    let conflicts = store.get_conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record.text.name.as_deref(), Some("Dalmore 12 (mine)"));
    assert!(store.get_pending_sync().unwrap().is_empty());
  }

  #[test]
  fn test_store_remote_keeps_local_changes() {
    let (_dir, store) = store();
    store.insert(&record(1, "Talisker")).unwrap();
    store.save_pending(&record(2, "Edited offline")).unwrap();

    let written = store
      .store_remote(&[record(1, "Talisker 10"), record(2, "Remote name"), record(3, "New")])
      .unwrap();
    assert_eq!(written, 2);

    let kept = store.get_by_id(2).unwrap().unwrap();
    assert_eq!(kept.record.text.name.as_deref(), Some("Edited offline"));
    assert_eq!(kept.sync_status, SyncStatus::Pending);
    assert_eq!(
      store.get_by_id(1).unwrap().unwrap().record.text.name.as_deref(),
      Some("Talisker 10")
    );
  }

  #[test]
  fn test_photos_survive_upsert_and_go_with_delete() {
    let (_dir, store) = store();
    store.insert(&record(1, "Springbank 10")).unwrap();
    store.add_photo(1, "file:///photos/1.jpg").unwrap();
    store.insert(&record(1, "Springbank 10 (2024)")).unwrap();
    assert_eq!(store.photos_for(1).unwrap().len(), 1);

    assert!(store.delete(1).unwrap());
    assert!(store.photos_for(1).unwrap().is_empty());
    assert!(store.add_photo(1, "file:///orphan.jpg").is_err());
  }

  #[test]
  fn test_stats_and_clear() {
    let (_dir, store) = store();
    store.insert(&record(1, "Highland Park 12")).unwrap();
    store.insert(&record(2, "Scapa Skiren")).unwrap();
    store.insert(&record(3, "Kilchoman")).unwrap();
    store.mark_as_updated(2).unwrap();
    store.mark_as_conflict(3).unwrap();
    store.add_photo(1, "file:///1.jpg").unwrap();

    let stats = store.get_stats().unwrap();
    assert_eq!(
      (stats.total, stats.pending, stats.conflicts, stats.photos),
      (3, 1, 1, 1)
    );
    assert_eq!(stats.last_sync, None);

    store.clear_database().unwrap();
    let stats = store.get_stats().unwrap();
    assert_eq!((stats.total, stats.photos), (0, 0));
  }
}
