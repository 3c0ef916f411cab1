//! Remote backend collaborator.
//!
//! The core only needs four operations from the backend: a filtered,
//! paginated read with an optional translation join, upserts for records and
//! translations, and delete. Everything else about the backend is opaque.

mod error;
#[cfg(test)]
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::types::{CanonicalRecord, RecordRow, Translation};

pub use error::{ErrorKind, RemoteError};
pub use rest::RestBackend;

/// Column filters for a record read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordFilters {
  pub country: Option<String>,
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub min_percentage: Option<f64>,
  pub max_percentage: Option<f64>,
}

/// A filtered, paginated read of canonical records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordQuery {
  /// Restrict to one record
  pub id: Option<i64>,
  /// Free-text match over name, region and type
  pub search: Option<String>,
  pub filters: RecordFilters,
  pub limit: u32,
  pub offset: u32,
}

impl RecordQuery {
  pub fn by_id(id: i64) -> Self {
    Self {
      id: Some(id),
      search: None,
      filters: RecordFilters::default(),
      limit: 1,
      offset: 0,
    }
  }
}

/// Backend operations the data-consistency layer depends on.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
  /// Read records, newest first. With `with_translations` every row carries
  /// its translation rows; without, `translations` is empty.
  async fn query_records(
    &self,
    query: &RecordQuery,
    with_translations: bool,
  ) -> Result<Vec<RecordRow>, RemoteError>;

  /// Insert or update by primary key, returning the stored row.
  async fn upsert_record(&self, record: &CanonicalRecord) -> Result<CanonicalRecord, RemoteError>;

  /// Insert or update keyed by `(record_id, language_code)`.
  async fn upsert_translation(&self, translation: &Translation) -> Result<(), RemoteError>;

  async fn delete_record(&self, id: i64) -> Result<(), RemoteError>;
}
