//! Errors returned by catalog accessors.

use crate::remote::{ErrorKind, RemoteError};

/// Failure of a catalog operation, as seen by callers of the accessors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
  /// Superseded by a newer load; never shown to the user
  #[error("request superseded by a newer one")]
  Cancelled,

  /// Backend failure that survived retries or was not retryable
  #[error(transparent)]
  Remote(#[from] RemoteError),

  /// Backend unreachable; the change was kept on this device for the next sync
  #[error("change kept locally: {0}")]
  Offline(RemoteError),

  /// The record has local edits the backend no longer agrees with
  #[error("record {0} has local changes that conflict with the backend")]
  Conflict(i64),

  /// No record with this id
  #[error("record {0} not found")]
  NotFound(i64),

  /// Rejected before reaching the backend
  #[error("invalid request: {0}")]
  Invalid(String),

  /// Offline store could not be read or written
  #[error("local storage failed: {0}")]
  Storage(String),
}

impl From<color_eyre::Report> for AccessError {
  fn from(report: color_eyre::Report) -> Self {
    AccessError::Storage(format!("{:#}", report))
  }
}

impl AccessError {
  /// Failed for a reason that may go away on its own.
  pub fn is_transient(&self) -> bool {
    match self {
      AccessError::Remote(e) | AccessError::Offline(e) => e.is_transient(),
      _ => false,
    }
  }

  /// The change did not reach the backend but is queued locally.
  pub fn is_saved_locally(&self) -> bool {
    matches!(self, AccessError::Offline(_))
  }

  /// Message suitable for showing to the user, `None` for cancellations.
  pub fn user_message(&self) -> Option<String> {
    let message = match self {
      AccessError::Cancelled => return None,
      AccessError::NotFound(id) => format!("Record {} does not exist.", id),
      AccessError::Invalid(reason) => format!("Invalid request: {}.", reason),
      AccessError::Storage(_) => "Saving on this device failed.".to_string(),
      AccessError::Offline(_) => {
        "The server could not be reached. The change was saved on this device and will be sent on the next sync."
          .to_string()
      }
      AccessError::Conflict(id) => format!(
        "Record {} was changed elsewhere while it had unsynced edits. Resolve it with `sync --resolve {} --keep local|remote`.",
        id, id
      ),
      AccessError::Remote(e) => match e.kind {
        ErrorKind::Connection | ErrorKind::Timeout => {
          "The server could not be reached. Check your connection and try again.".to_string()
        }
        ErrorKind::Server => "The server is having trouble. Please try again later.".to_string(),
        ErrorKind::Permission => "You are not allowed to do that.".to_string(),
        ErrorKind::NotFound => "The requested item does not exist.".to_string(),
        ErrorKind::Validation => format!("The change was rejected: {}", e.message),
        ErrorKind::RelationMissing | ErrorKind::Decode => {
          "The server returned data this version does not understand.".to_string()
        }
      },
    };
    Some(message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cancelled_has_no_user_message() {
    assert_eq!(AccessError::Cancelled.user_message(), None);
    assert!(!AccessError::Cancelled.is_transient());
  }

  #[test]
  fn test_validation_message_includes_backend_reason() {
    let err = AccessError::from(RemoteError::new(
      ErrorKind::Validation,
      "value too long for type character varying(80)",
    ));
    assert!(!err.is_transient());
    assert!(err
      .user_message()
      .unwrap()
      .contains("value too long"));
  }

  #[test]
  fn test_only_offline_reports_saved_locally() {
    let unreachable = RemoteError::new(ErrorKind::Connection, "connection refused");
    let kept = AccessError::Offline(unreachable.clone());
    assert!(kept.is_saved_locally());
    assert!(kept.is_transient());
    assert!(kept.user_message().unwrap().contains("saved on this device"));

    let dropped = AccessError::from(unreachable);
    assert!(dropped.is_transient());
    assert!(!dropped.is_saved_locally());
  }
}
