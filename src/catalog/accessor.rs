//! Catalog reads and writes composed from cache, retry and resolver.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::{record_namespace, CatalogQueryKey, ListParams, LIST_NAMESPACE};
use super::resolve::{canonical, resolve};
use super::types::{
  CanonicalRecord, Language, LocalizedRecord, RecordPatch, RecordRow, TextFields, Translation,
  TranslationStatus,
};
use crate::cache::{CacheStore, QueryKey};
use crate::error::AccessError;
use crate::local::{diverged, LocalStore, SyncStatus};
use crate::query::GenerationToken;
use crate::remote::{RecordQuery, RemoteBackend};
use crate::retry::RetryPolicy;

/// Knobs of a [`Catalog`].
#[derive(Debug, Clone)]
pub struct CatalogSettings {
  /// Language of the canonical records
  pub base: Language,
  pub fallback_order: Vec<Language>,
  /// How long a fetched page stays in the cache
  pub ttl: Duration,
  pub retry: RetryPolicy,
}

impl Default for CatalogSettings {
  fn default() -> Self {
    Self {
      base: Language::Tr,
      fallback_order: Language::ALL.to_vec(),
      ttl: Duration::from_secs(300),
      retry: RetryPolicy::default(),
    }
  }
}

/// Rows as fetched, before localization.
#[derive(Debug, Clone)]
struct Fetched {
  rows: Arc<Vec<RecordRow>>,
  /// Translations were unavailable and the reduced query was used
  degraded: bool,
}

/// One page of localized records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordPage {
  pub records: Vec<LocalizedRecord>,
  pub lang: Language,
  pub offset: u32,
  /// Shown without translations because the backend lacks the relation
  pub degraded: bool,
  /// A full page came back, so there may be more
  pub has_more: bool,
}

/// Read the rows for `query`, falling back to the reduced query when the
/// translation relation is missing.
async fn fetch_rows(
  backend: Arc<dyn RemoteBackend>,
  retry: RetryPolicy,
  token: GenerationToken,
  query: RecordQuery,
) -> Result<Fetched, AccessError> {
  match retry
    .run(&token, || backend.query_records(&query, true))
    .await
  {
    Ok(rows) => Ok(Fetched {
      rows: Arc::new(rows),
      degraded: false,
    }),
    Err(AccessError::Remote(e)) if e.is_relation_missing() => {
      warn!(error = %e, "Translations unavailable, using reduced query");
      let rows = retry
        .run(&token, || backend.query_records(&query, false))
        .await?;
      Ok(Fetched {
        rows: Arc::new(rows),
        degraded: true,
      })
    }
    Err(e) => Err(e),
  }
}

/// Entry point for catalog data.
///
/// Reads are deduplicated and cached per fingerprint, retried on transient
/// failures and resolved into the requested language. Writes go straight to
/// the backend and invalidate the affected cache entries. With a
/// [`LocalStore`] attached, confirmed writes are mirrored locally and
/// transiently failing ones are kept as pending.
pub struct Catalog {
  backend: Arc<dyn RemoteBackend>,
  cache: CacheStore<Fetched, AccessError>,
  settings: CatalogSettings,
  local: Option<Arc<LocalStore>>,
}

impl Catalog {
  pub fn new(backend: Arc<dyn RemoteBackend>, settings: CatalogSettings) -> Self {
    Self {
      backend,
      cache: CacheStore::new(),
      settings,
      local: None,
    }
  }

  pub fn with_local_store(mut self, local: Arc<LocalStore>) -> Self {
    self.local = Some(local);
    self
  }

  pub fn settings(&self) -> &CatalogSettings {
    &self.settings
  }

  fn invalidate_record(&self, id: i64) {
    self.cache.invalidate(&format!("{}:*", LIST_NAMESPACE));
    self.cache.invalidate(&format!("{}:*", record_namespace(id)));
  }

  async fn fetch(
    &self,
    key: &CatalogQueryKey,
    query: RecordQuery,
    token: &GenerationToken,
  ) -> Result<Fetched, AccessError> {
    let hash = key.cache_hash();
    loop {
      let producer = || {
        fetch_rows(
          Arc::clone(&self.backend),
          self.settings.retry.clone(),
          token.clone(),
          query.clone(),
        )
      };
      match self.cache.deduplicate(&hash, producer, self.settings.ttl).await {
        // The shared load belonged to a superseded caller; run our own
        Err(AccessError::Cancelled) if token.is_current() => {
          debug!(key = %key.description(), "Joined load was superseded, reloading");
        }
        result => return result,
      }
    }
  }

  fn localize(&self, row: &RecordRow, lang: Language, degraded: bool) -> LocalizedRecord {
    if degraded {
      canonical(&row.record, lang, self.settings.base)
    } else {
      resolve(
        &row.record,
        &row.translations,
        lang,
        self.settings.base,
        &self.settings.fallback_order,
      )
    }
  }

  /// Load one page of records in `params.lang`.
  pub async fn list(
    &self,
    params: &ListParams,
    token: &GenerationToken,
  ) -> Result<RecordPage, AccessError> {
    let key = CatalogQueryKey::List(params.clone());
    let fetched = self.fetch(&key, params.to_query(), token).await?;

    let records: Vec<LocalizedRecord> = fetched
      .rows
      .iter()
      .map(|row| self.localize(row, params.lang, fetched.degraded))
      .collect();
    let has_more = records.len() as u32 >= params.limit && params.limit > 0;

    Ok(RecordPage {
      records,
      lang: params.lang,
      offset: params.offset,
      degraded: fetched.degraded,
      has_more,
    })
  }

  /// Same as [`list`](Self::list), skipping any cached copy.
  pub async fn list_fresh(
    &self,
    params: &ListParams,
    token: &GenerationToken,
  ) -> Result<RecordPage, AccessError> {
    self
      .cache
      .invalidate(&CatalogQueryKey::List(params.clone()).cache_hash());
    self.list(params, token).await
  }

  /// Load one record in `lang`.
  pub async fn get(
    &self,
    id: i64,
    lang: Language,
    token: &GenerationToken,
  ) -> Result<LocalizedRecord, AccessError> {
    let key = CatalogQueryKey::Detail { id, lang };
    let fetched = self.fetch(&key, RecordQuery::by_id(id), token).await?;

    fetched
      .rows
      .first()
      .map(|row| self.localize(row, lang, fetched.degraded))
      .ok_or(AccessError::NotFound(id))
  }

  async fn fetch_canonical(
    &self,
    id: i64,
    with_translations: bool,
    token: &GenerationToken,
  ) -> Result<RecordRow, AccessError> {
    let query = RecordQuery::by_id(id);
    let rows = self
      .settings
      .retry
      .run(token, || self.backend.query_records(&query, with_translations))
      .await?;
    rows.into_iter().next().ok_or(AccessError::NotFound(id))
  }

  /// Apply `patch` to record `id` and return the record as now shown in the
  /// patch language.
  ///
  /// A base-language patch rewrites the canonical record, then mirrors the
  /// result into the translation table. The mirror is advisory: its failure
  /// is logged, not returned. Any other language updates that language's
  /// translation row, keeping the fields the patch does not mention.
  ///
  /// With a local store attached, a base-language patch on a record with
  /// unsynced local edits is written together with those edits, or kept
  /// locally as [`AccessError::Conflict`] if the backend copy moved on. When
  /// the backend is unreachable the patch is kept locally if there is a copy
  /// to apply it to, reported as [`AccessError::Offline`].
  pub async fn mutate(
    &self,
    id: i64,
    patch: &RecordPatch,
    token: &GenerationToken,
  ) -> Result<LocalizedRecord, AccessError> {
    if patch.is_empty() {
      return Err(AccessError::Invalid("patch changes no fields".to_string()));
    }

    let result = if patch.language == self.settings.base {
      self.mutate_canonical(id, patch, token).await
    } else {
      self.mutate_translation(id, patch, token).await
    };

    if result.is_ok() {
      self.invalidate_record(id);
      info!(id, lang = %patch.language, "Record updated");
    }
    result
  }

  async fn mutate_canonical(
    &self,
    id: i64,
    patch: &RecordPatch,
    token: &GenerationToken,
  ) -> Result<LocalizedRecord, AccessError> {
    // Unsynced local edits are written together with the patch, never over
    let unsynced = match &self.local {
      Some(local) => local
        .get_by_id(id)?
        .filter(|l| l.sync_status != SyncStatus::Synced),
      None => None,
    };

    let remote = match self.fetch_canonical(id, false, token).await {
      Ok(row) => row.record,
      Err(e) if e.is_transient() => return Err(self.keep_offline(id, None, patch, e)),
      Err(e) => return Err(e),
    };

    let mut record = match unsynced {
      Some(edited)
        if edited.sync_status == SyncStatus::Conflict || diverged(&edited.record, Some(&remote)) =>
      {
        return Err(self.keep_conflicted(edited.record, patch));
      }
      Some(edited) => edited.record,
      None => remote,
    };
    record.text.apply(&patch.fields);

    let outgoing = record.stamped();
    let upserted = self
      .settings
      .retry
      .run(token, || self.backend.upsert_record(&outgoing))
      .await;
    let stored = match upserted {
      Ok(stored) => stored,
      Err(e) if e.is_transient() => return Err(self.keep_offline(id, Some(record), patch, e)),
      Err(e) => return Err(e),
    };

    let mirror = Translation {
      record_id: stored.id,
      language_code: self.settings.base,
      text: stored.text.clone(),
      translation_status: TranslationStatus::Human,
      source_language_code: None,
    };
    if let Err(e) = self
      .settings
      .retry
      .run(token, || self.backend.upsert_translation(&mirror))
      .await
    {
      warn!(id, error = %e, "Base-language mirror write failed");
    }

    if let Some(local) = &self.local {
      local.insert(&stored)?;
    }
    Ok(canonical(&stored, self.settings.base, self.settings.base))
  }

  async fn mutate_translation(
    &self,
    id: i64,
    patch: &RecordPatch,
    token: &GenerationToken,
  ) -> Result<LocalizedRecord, AccessError> {
    let row = self.fetch_canonical(id, true, token).await?;

    let mut text = row
      .translations
      .iter()
      .find(|t| t.language_code == patch.language)
      .map(|t| t.text.clone())
      .unwrap_or_else(TextFields::default);
    text.apply(&patch.fields);

    let translation = Translation {
      record_id: id,
      language_code: patch.language,
      text,
      translation_status: TranslationStatus::Human,
      source_language_code: Some(self.settings.base),
    };
    self
      .settings
      .retry
      .run(token, || self.backend.upsert_translation(&translation))
      .await?;

    Ok(resolve(
      &row.record,
      std::slice::from_ref(&translation),
      patch.language,
      self.settings.base,
      &self.settings.fallback_order,
    ))
  }

  /// Apply a base-language patch to the local copy and queue it for sync.
  ///
  /// Returns [`AccessError::Offline`] when the change was kept, otherwise
  /// `err` (or the storage failure) unchanged.
  fn keep_offline(
    &self,
    id: i64,
    fetched: Option<CanonicalRecord>,
    patch: &RecordPatch,
    err: AccessError,
  ) -> AccessError {
    let cause = match err {
      AccessError::Remote(cause) => cause,
      other => return other,
    };
    let Some(local) = &self.local else {
      return AccessError::Remote(cause);
    };

    let current = match local.get_by_id(id) {
      Ok(Some(found)) => Some((found.record, found.sync_status)),
      Ok(None) => fetched.map(|record| (record, SyncStatus::Pending)),
      Err(storage) => return storage.into(),
    };
    let Some((mut record, status)) = current else {
      debug!(id, "No local copy to keep the change on");
      return AccessError::Remote(cause);
    };

    record.text.apply(&patch.fields);
    let saved = if status == SyncStatus::Conflict {
      local.save_conflict(&record)
    } else {
      local.save_pending(&record)
    };
    if let Err(storage) = saved {
      return storage.into();
    }
    info!(id, "Backend unreachable, change kept locally for sync");
    AccessError::Offline(cause)
  }

  /// Keep the patch on a local edit that clashes with the backend and leave
  /// it for manual resolution.
  fn keep_conflicted(&self, mut record: CanonicalRecord, patch: &RecordPatch) -> AccessError {
    let id = record.id;
    record.text.apply(&patch.fields);
    if let Some(local) = &self.local {
      if let Err(storage) = local.save_conflict(&record) {
        return storage.into();
      }
    }
    warn!(id, "Record changed remotely while it had local edits, flagged as conflict");
    AccessError::Conflict(id)
  }

  /// Create or replace a canonical record.
  pub async fn upsert(
    &self,
    record: &CanonicalRecord,
    token: &GenerationToken,
  ) -> Result<CanonicalRecord, AccessError> {
    let outgoing = record.stamped();
    let stored = self
      .settings
      .retry
      .run(token, || self.backend.upsert_record(&outgoing))
      .await?;
    self.invalidate_record(stored.id);
    if let Some(local) = &self.local {
      local.insert(&stored)?;
    }
    Ok(stored)
  }

  /// Delete a record and its translations.
  pub async fn remove(&self, id: i64, token: &GenerationToken) -> Result<(), AccessError> {
    self
      .settings
      .retry
      .run(token, || self.backend.delete_record(id))
      .await?;
    self.invalidate_record(id);
    if let Some(local) = &self.local {
      local.delete(id)?;
    }
    info!(id, "Record removed");
    Ok(())
  }
}
