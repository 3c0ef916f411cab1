//! Cache keys for catalog reads.

use serde::Serialize;

use super::types::Language;
use crate::cache::{fingerprint, QueryKey};
use crate::remote::{RecordFilters, RecordQuery};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Namespace of every list fingerprint; `records:*` drops them all.
pub const LIST_NAMESPACE: &str = "records";

/// Prefix of every cache key belonging to one record.
pub fn record_namespace(id: i64) -> String {
  format!("record:{}", id)
}

/// Parameters of a paginated list load.
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
  pub lang: Language,
  pub limit: u32,
  pub offset: u32,
  pub search: Option<String>,
  pub filters: RecordFilters,
}

impl ListParams {
  pub fn new(lang: Language) -> Self {
    Self {
      lang,
      limit: DEFAULT_PAGE_SIZE,
      offset: 0,
      search: None,
      filters: RecordFilters::default(),
    }
  }

  pub fn page(mut self, limit: u32, offset: u32) -> Self {
    self.limit = limit;
    self.offset = offset;
    self
  }

  pub fn search(mut self, term: impl Into<String>) -> Self {
    self.search = Some(term.into());
    self
  }

  pub fn filters(mut self, filters: RecordFilters) -> Self {
    self.filters = filters;
    self
  }

  /// Trimmed, lowercased search term; blank counts as no search.
  pub fn normalized_search(&self) -> Option<String> {
    self
      .search
      .as_deref()
      .map(|s| s.trim().to_lowercase())
      .filter(|s| !s.is_empty())
  }

  pub fn to_query(&self) -> RecordQuery {
    RecordQuery {
      id: None,
      search: self.normalized_search(),
      filters: self.filters.clone(),
      limit: self.limit,
      offset: self.offset,
    }
  }
}

#[derive(Serialize)]
struct ListFingerprint<'a> {
  lang: Language,
  limit: u32,
  offset: u32,
  search: Option<String>,
  filters: &'a RecordFilters,
}

/// Identity of a catalog read.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogQueryKey {
  List(ListParams),
  Detail { id: i64, lang: Language },
}

impl QueryKey for CatalogQueryKey {
  fn cache_hash(&self) -> String {
    match self {
      CatalogQueryKey::List(params) => fingerprint(
        LIST_NAMESPACE,
        &ListFingerprint {
          lang: params.lang,
          limit: params.limit,
          offset: params.offset,
          search: params.normalized_search(),
          filters: &params.filters,
        },
      ),
      CatalogQueryKey::Detail { id, lang } => fingerprint(&record_namespace(*id), lang),
    }
  }

  fn description(&self) -> String {
    match self {
      CatalogQueryKey::List(p) => match p.normalized_search() {
        Some(term) => format!(
          "records[{}] {}+{} search={:?}",
          p.lang, p.offset, p.limit, term
        ),
        None => format!("records[{}] {}+{}", p.lang, p.offset, p.limit),
      },
      CatalogQueryKey::Detail { id, lang } => format!("record {} [{}]", id, lang),
    }
  }
}
