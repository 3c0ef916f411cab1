//! Reconciliation between the offline store and the backend.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::{LocalRecord, LocalStore, SyncStatus};
use crate::catalog::types::CanonicalRecord;
use crate::query::GenerationToken;
use crate::remote::{RecordQuery, RemoteBackend};
use crate::retry::RetryPolicy;

/// Page size used when pulling remote records.
const PULL_PAGE: u32 = 200;

/// Outcome of one [`SyncJob::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Pending records written to the backend
  pub pushed: usize,
  /// Pending records whose remote copy moved on; left for manual resolution
  pub conflicts: usize,
  /// Pending records that could not be pushed this time
  pub failed: usize,
  /// Remote records refreshed locally
  pub pulled: usize,
}

/// Which side wins when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  KeepLocal,
  KeepRemote,
}

/// Pushes pending local records and pulls remote ones.
pub struct SyncJob {
  backend: Arc<dyn RemoteBackend>,
  local: Arc<LocalStore>,
  retry: RetryPolicy,
}

/// The backend copy changed after the local edit was based on it.
pub fn diverged(local: &CanonicalRecord, remote: Option<&CanonicalRecord>) -> bool {
  match remote {
    Some(remote) => match (remote.updated_at, local.updated_at) {
      (Some(theirs), Some(base)) => theirs > base,
      (Some(_), None) => true,
      (None, _) => false,
    },
    // Deleted remotely after we last saw it
    None => local.updated_at.is_some(),
  }
}

impl SyncJob {
  pub fn new(backend: Arc<dyn RemoteBackend>, local: Arc<LocalStore>, retry: RetryPolicy) -> Self {
    Self {
      backend,
      local,
      retry,
    }
  }

  async fn fetch_remote(&self, id: i64) -> Result<Option<CanonicalRecord>> {
    let token = GenerationToken::detached();
    let query = RecordQuery::by_id(id);
    let rows = self
      .retry
      .run(&token, || self.backend.query_records(&query, false))
      .await?;
    Ok(rows.into_iter().next().map(|row| row.record))
  }

  async fn push(&self, record: &CanonicalRecord) -> Result<CanonicalRecord> {
    let token = GenerationToken::detached();
    let outgoing = record.stamped();
    let stored = self
      .retry
      .run(&token, || self.backend.upsert_record(&outgoing))
      .await?;
    self.local.insert(&stored)?;
    Ok(stored)
  }

  async fn sync_one(&self, pending: &LocalRecord, report: &mut SyncReport) -> Result<()> {
    let id = pending.record.id;
    let remote = match self.fetch_remote(id).await {
      Ok(remote) => remote,
      Err(e) => {
        warn!(id, error = %e, "Could not check remote copy, keeping record pending");
        report.failed += 1;
        return Ok(());
      }
    };

    if diverged(&pending.record, remote.as_ref()) {
      warn!(id, "Remote copy changed since local edit, flagging conflict");
      self.local.mark_as_conflict(id)?;
      report.conflicts += 1;
      return Ok(());
    }

    match self.push(&pending.record).await {
      Ok(_) => report.pushed += 1,
      Err(e) => {
        warn!(id, error = %e, "Push failed, keeping record pending");
        report.failed += 1;
      }
    }
    Ok(())
  }

  /// Push every pending record, then pull the remote catalog and record the
  /// sync time. Storage failures abort the run; backend failures are counted
  /// per record.
  pub async fn run(&self) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    let pending = self.local.get_pending_sync()?;
    info!(count = pending.len(), "Syncing pending records");
    for record in &pending {
      self.sync_one(record, &mut report).await?;
    }

    report.pulled = self.pull().await?;
    self.local.set_last_sync_time(Utc::now())?;

    info!(
      pushed = report.pushed,
      conflicts = report.conflicts,
      failed = report.failed,
      pulled = report.pulled,
      "Sync finished"
    );
    Ok(report)
  }

  /// Copy remote records into the store, leaving unsynced local edits alone.
  pub async fn pull(&self) -> Result<usize> {
    let token = GenerationToken::detached();
    let mut offset = 0;
    let mut written = 0;

    loop {
      let query = RecordQuery {
        id: None,
        search: None,
        filters: Default::default(),
        limit: PULL_PAGE,
        offset,
      };
      let rows = self
        .retry
        .run(&token, || self.backend.query_records(&query, false))
        .await?;
      let fetched = rows.len();

      let records: Vec<CanonicalRecord> = rows.into_iter().map(|row| row.record).collect();
      written += self.local.store_remote(&records)?;

      if fetched < PULL_PAGE as usize {
        break;
      }
      offset += PULL_PAGE;
    }
    Ok(written)
  }

  /// Settle a record flagged as [`SyncStatus::Conflict`].
  pub async fn resolve_conflict(&self, id: i64, resolution: Resolution) -> Result<()> {
    let local = self
      .local
      .get_by_id(id)?
      .ok_or_else(|| eyre!("No local record {}", id))?;
    if local.sync_status != SyncStatus::Conflict {
      return Err(eyre!("Record {} is {}, not in conflict", id, local.sync_status));
    }

    match resolution {
      Resolution::KeepLocal => {
        self.push(&local.record).await?;
      }
      Resolution::KeepRemote => match self.fetch_remote(id).await? {
        Some(remote) => self.local.insert(&remote)?,
        None => {
          self.local.delete(id)?;
        }
      },
    }
    info!(id, ?resolution, "Conflict resolved");
    Ok(())
  }
}
