//! In-memory backend with scripted failures and latency, for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ErrorKind, RecordQuery, RemoteBackend, RemoteError};
use crate::catalog::types::{CanonicalRecord, RecordRow, Translation};

#[derive(Default)]
struct State {
  records: BTreeMap<i64, CanonicalRecord>,
  translations: Vec<Translation>,
  /// Failures handed out to the next calls, one per call
  failures: VecDeque<RemoteError>,
  /// Latency for the next calls, one per call; `default_latency` after that
  latencies: VecDeque<Duration>,
  default_latency: Duration,
  translations_missing: bool,
  fail_translation_writes: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
  state: Arc<Mutex<State>>,
  queries: Arc<AtomicU32>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  pub fn with_record(self, record: CanonicalRecord) -> Self {
    self.lock().records.insert(record.id, record);
    self
  }

  pub fn with_translation(self, translation: Translation) -> Self {
    self.lock().translations.push(translation);
    self
  }

  /// Behave as if the translations relation did not exist.
  pub fn without_translations_relation(self) -> Self {
    self.lock().translations_missing = true;
    self
  }

  pub fn fail_translation_writes(&self) {
    self.lock().fail_translation_writes = true;
  }

  pub fn fail_next(&self, times: usize, kind: ErrorKind) {
    let mut state = self.lock();
    for _ in 0..times {
      state
        .failures
        .push_back(RemoteError::new(kind, format!("scripted {:?}", kind)));
    }
  }

  pub fn push_latency(&self, latency: Duration) {
    self.lock().latencies.push_back(latency);
  }

  pub fn set_default_latency(&self, latency: Duration) {
    self.lock().default_latency = latency;
  }

  /// Change a record behind the client's back.
  pub fn touch_record(&self, id: i64, name: &str) {
    let mut state = self.lock();
    if let Some(record) = state.records.get_mut(&id) {
      record.text.name = Some(name.to_string());
      record.updated_at = Some(Utc::now());
    }
  }

  pub fn record(&self, id: i64) -> Option<CanonicalRecord> {
    self.lock().records.get(&id).cloned()
  }

  pub fn translations_for(&self, id: i64) -> Vec<Translation> {
    self
      .lock()
      .translations
      .iter()
      .filter(|t| t.record_id == id)
      .cloned()
      .collect()
  }

  pub fn query_calls(&self) -> u32 {
    self.queries.load(Ordering::SeqCst)
  }

  /// Take this call's latency and scripted failure.
  async fn enter(&self) -> Result<(), RemoteError> {
    let (latency, failure) = {
      let mut state = self.lock();
      let latency = state
        .latencies
        .pop_front()
        .unwrap_or(state.default_latency);
      (latency, state.failures.pop_front())
    };
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
    match failure {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn contains(value: &Option<String>, term: &str) -> bool {
  value
    .as_deref()
    .map_or(false, |v| v.to_lowercase().contains(term))
}

fn matches(record: &CanonicalRecord, query: &RecordQuery) -> bool {
  let filters = &query.filters;
  if query.id.is_some_and(|id| id != record.id) {
    return false;
  }
  if filters.country.is_some() && filters.country != record.country {
    return false;
  }
  if filters.kind.is_some() && filters.kind != record.text.kind {
    return false;
  }
  let pct = record.percentage.unwrap_or(0.0);
  if filters.min_percentage.is_some_and(|min| pct < min) {
    return false;
  }
  if filters.max_percentage.is_some_and(|max| pct > max) {
    return false;
  }
  if let Some(term) = query.search.as_deref().map(str::to_lowercase) {
    let text = &record.text;
    if !(contains(&text.name, &term) || contains(&text.region, &term) || contains(&text.kind, &term))
    {
      return false;
    }
  }
  true
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
  async fn query_records(
    &self,
    query: &RecordQuery,
    with_translations: bool,
  ) -> Result<Vec<RecordRow>, RemoteError> {
    self.queries.fetch_add(1, Ordering::SeqCst);
    self.enter().await?;

    let state = self.lock();
    if with_translations && state.translations_missing {
      return Err(
        RemoteError::new(
          ErrorKind::RelationMissing,
          "Could not find a relationship between 'whiskies' and 'whisky_translations'",
        )
        .with_code("PGRST200")
        .with_status(400),
      );
    }

    let mut records: Vec<&CanonicalRecord> =
      state.records.values().filter(|r| matches(r, query)).collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    Ok(
      records
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .map(|record| RecordRow {
          record: record.clone(),
          translations: if with_translations {
            state
              .translations
              .iter()
              .filter(|t| t.record_id == record.id)
              .cloned()
              .collect()
          } else {
            Vec::new()
          },
        })
        .collect(),
    )
  }

  async fn upsert_record(&self, record: &CanonicalRecord) -> Result<CanonicalRecord, RemoteError> {
    self.enter().await?;

    // stores exactly what the client sent, timestamp included
    self.lock().records.insert(record.id, record.clone());
    Ok(record.clone())
  }

  async fn upsert_translation(&self, translation: &Translation) -> Result<(), RemoteError> {
    self.enter().await?;

    let mut state = self.lock();
    if state.fail_translation_writes {
      return Err(RemoteError::new(ErrorKind::Permission, "translations are read-only"));
    }
    state.translations.retain(|t| {
      !(t.record_id == translation.record_id && t.language_code == translation.language_code)
    });
    state.translations.push(translation.clone());
    Ok(())
  }

  async fn delete_record(&self, id: i64) -> Result<(), RemoteError> {
    self.enter().await?;

    let mut state = self.lock();
    state.records.remove(&id);
    state.translations.retain(|t| t.record_id != id);
    Ok(())
  }
}
