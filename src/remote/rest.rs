//! PostgREST-style HTTP backend.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::error::{from_response, from_transport};
use super::{ErrorKind, RecordQuery, RemoteBackend, RemoteError};
use crate::catalog::types::{CanonicalRecord, RecordRow, Translation};
use crate::config::BackendConfig;

const PREFER: &str = "Prefer";

/// Backend client speaking the PostgREST dialect over HTTP.
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  base: Url,
  records_table: String,
  translations_table: String,
}

impl RestBackend {
  pub fn new(config: &BackendConfig, api_key: &str) -> Result<Self> {
    let mut base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid backend url '{}': {}", config.url, e))?;
    // Url::join treats a base without a trailing slash as a file
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid API key: {}", e))?,
    );
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| eyre!("Invalid API key: {}", e))?,
    );

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      records_table: config.records_table.clone(),
      translations_table: config.translations_table.clone(),
    })
  }

  fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
    self
      .base
      .join(&format!("rest/v1/{}", table))
      .map_err(|e| RemoteError::new(ErrorKind::Validation, format!("Bad table url: {}", e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    debug!(%method, %url, "Backend request");
    self.client.request(method, url)
  }

  fn select_clause(&self, with_translations: bool) -> String {
    if with_translations {
      // Alias the embed so rows always carry it under `translations`
      format!("*,translations:{}(*)", self.translations_table)
    } else {
      "*".to_string()
    }
  }

  /// Append the PostgREST filter parameters for `query`.
  fn apply_query(&self, url: &mut Url, query: &RecordQuery, with_translations: bool) {
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("select", &self.select_clause(with_translations));

    if let Some(id) = query.id {
      pairs.append_pair("id", &format!("eq.{}", id));
    }
    if let Some(country) = &query.filters.country {
      pairs.append_pair("country", &format!("eq.{}", country));
    }
    if let Some(kind) = &query.filters.kind {
      pairs.append_pair("type", &format!("eq.{}", kind));
    }
    if let Some(min) = query.filters.min_percentage {
      pairs.append_pair("percentage", &format!("gte.{}", min));
    }
    if let Some(max) = query.filters.max_percentage {
      pairs.append_pair("percentage", &format!("lte.{}", max));
    }
    if let Some(term) = query.search.as_deref().map(sanitize_term) {
      if !term.is_empty() {
        pairs.append_pair(
          "or",
          &format!(
            "(name.ilike.*{t}*,region.ilike.*{t}*,type.ilike.*{t}*)",
            t = term
          ),
        );
      }
    }

    pairs.append_pair("order", "created_at.desc,id.desc");
    pairs.append_pair("limit", &query.limit.to_string());
    pairs.append_pair("offset", &query.offset.to_string());
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request.send().await.map_err(|e| from_transport(&e))?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(from_response(status.as_u16(), &body))
  }
}

/// Strip characters that would break out of a PostgREST `or=(...)` list.
fn sanitize_term(term: &str) -> String {
  term
    .trim()
    .chars()
    .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
    .collect()
}

#[async_trait]
impl RemoteBackend for RestBackend {
  async fn query_records(
    &self,
    query: &RecordQuery,
    with_translations: bool,
  ) -> Result<Vec<RecordRow>, RemoteError> {
    let mut url = self.table_url(&self.records_table)?;
    self.apply_query(&mut url, query, with_translations);

    let response = self.send(self.request(Method::GET, url)).await?;
    response
      .json::<Vec<RecordRow>>()
      .await
      .map_err(|e| RemoteError::new(ErrorKind::Decode, format!("Failed to parse records: {}", e)))
  }

  async fn upsert_record(&self, record: &CanonicalRecord) -> Result<CanonicalRecord, RemoteError> {
    let url = self.table_url(&self.records_table)?;
    let request = self
      .request(Method::POST, url)
      .header(PREFER, "resolution=merge-duplicates,return=representation")
      .json(&[record]);

    let rows: Vec<CanonicalRecord> = self
      .send(request)
      .await?
      .json()
      .await
      .map_err(|e| RemoteError::new(ErrorKind::Decode, format!("Failed to parse record: {}", e)))?;

    rows.into_iter().next().ok_or_else(|| {
      RemoteError::new(
        ErrorKind::Decode,
        format!("Upsert of record {} returned no row", record.id),
      )
    })
  }

  async fn upsert_translation(&self, translation: &Translation) -> Result<(), RemoteError> {
    let mut url = self.table_url(&self.translations_table)?;
    url
      .query_pairs_mut()
      .append_pair("on_conflict", "whisky_id,language_code");

    let request = self
      .request(Method::POST, url)
      .header(PREFER, "resolution=merge-duplicates,return=minimal")
      .json(&[translation]);
    self.send(request).await?;
    Ok(())
  }

  async fn delete_record(&self, id: i64) -> Result<(), RemoteError> {
    let mut url = self.table_url(&self.records_table)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
    self.send(self.request(Method::DELETE, url)).await?;
    Ok(())
  }
}
