//! Per-view load state on top of [`Catalog`].

use std::sync::{Arc, Mutex};
use tracing::debug;

use super::accessor::{Catalog, RecordPage};
use super::key::ListParams;
use super::types::{Language, LocalizedRecord, RecordPatch};
use crate::error::AccessError;
use crate::query::{GenerationToken, LoadStream, QueryState};

/// Owns the generation counters of one client view: a record list and a
/// record detail. Loads on the same stream may overlap freely; only the most
/// recently started one is ever committed.
pub struct CatalogSession {
  catalog: Arc<Catalog>,
  list: LoadStream<RecordPage, AccessError>,
  detail: LoadStream<LocalizedRecord, AccessError>,
  last_list: Mutex<Option<ListParams>>,
  last_detail: Mutex<Option<(i64, Language)>>,
}

impl CatalogSession {
  pub fn new(catalog: Arc<Catalog>) -> Self {
    Self {
      catalog,
      list: LoadStream::new(),
      detail: LoadStream::new(),
      last_list: Mutex::new(None),
      last_detail: Mutex::new(None),
    }
  }

  pub fn catalog(&self) -> &Arc<Catalog> {
    &self.catalog
  }

  /// Load a page of records. Returns whether the result was committed.
  pub async fn load_records(&self, params: ListParams) -> bool {
    *self.last_list.lock().unwrap_or_else(|e| e.into_inner()) = Some(params.clone());
    let token = self.list.begin();
    let result = self.catalog.list(&params, &token).await;
    self.list.commit(&token, result)
  }

  /// Load one record. Returns whether the result was committed.
  pub async fn load_record_by_id(&self, id: i64, lang: Language) -> bool {
    *self.last_detail.lock().unwrap_or_else(|e| e.into_inner()) = Some((id, lang));
    let token = self.detail.begin();
    let result = self.catalog.get(id, lang, &token).await;
    self.detail.commit(&token, result)
  }

  /// Re-run the last list load, skipping the cache.
  ///
  /// Meant for refocus and reconnect. Does nothing before the first load.
  pub async fn refetch(&self) -> bool {
    let params = self
      .last_list
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone();
    let Some(params) = params else {
      debug!("Nothing to refetch");
      return false;
    };

    let token = self.list.begin();
    let result = self.catalog.list_fresh(&params, &token).await;
    self.list.commit(&token, result)
  }

  /// Write `patch`, then refresh whatever this session shows of the record.
  pub async fn mutate(&self, id: i64, patch: &RecordPatch) -> Result<LocalizedRecord, AccessError> {
    // Writes are not superseded by later loads
    let updated = self
      .catalog
      .mutate(id, patch, &GenerationToken::detached())
      .await?;

    let detail = *self.last_detail.lock().unwrap_or_else(|e| e.into_inner());
    if let Some((shown_id, lang)) = detail.filter(|(shown_id, _)| *shown_id == id) {
      self.load_record_by_id(shown_id, lang).await;
    }
    self.refetch().await;
    Ok(updated)
  }

  pub fn records(&self) -> QueryState<RecordPage, AccessError> {
    self.list.snapshot()
  }

  pub fn record(&self) -> QueryState<LocalizedRecord, AccessError> {
    self.detail.snapshot()
  }

  /// Drop interest in every in-flight load.
  #[allow(dead_code)]
  pub fn cancel(&self) {
    self.list.cancel();
    self.detail.cancel();
  }
}
