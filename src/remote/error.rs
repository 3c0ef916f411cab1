//! Backend error shape and its classification into a closed set of kinds.
//!
//! Every failure leaving the backend adapter is a [`RemoteError`] whose
//! [`ErrorKind`] was decided exactly once, in [`classify`]. Retry and
//! degraded-mode decisions match on the kind and never look at messages.

use serde::Deserialize;

/// What went wrong talking to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Could not reach the backend (DNS, refused, reset)
  Connection,
  /// Request did not complete in time
  Timeout,
  /// 5xx from the backend
  Server,
  /// The expected relation/join does not exist in the backend schema
  RelationMissing,
  /// Constraint violation or malformed request (4xx)
  Validation,
  /// Authentication or row-level security rejection
  Permission,
  /// Requested row does not exist
  NotFound,
  /// Response body did not match the expected shape
  Decode,
}

impl ErrorKind {
  /// Transient failures are worth retrying.
  pub fn is_transient(self) -> bool {
    matches!(
      self,
      ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Server
    )
  }
}

/// A classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct RemoteError {
  pub kind: ErrorKind,
  /// Machine-readable code reported by the backend, if any
  pub code: Option<String>,
  pub message: String,
  /// HTTP status, if the request got that far
  pub status: Option<u16>,
}

impl RemoteError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      code: None,
      message: message.into(),
      status: None,
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = Some(status);
    self
  }

  pub fn is_transient(&self) -> bool {
    self.kind.is_transient()
  }

  pub fn is_relation_missing(&self) -> bool {
    self.kind == ErrorKind::RelationMissing
  }
}

/// Error body returned by PostgREST-style backends.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub code: Option<String>,
  #[serde(default)]
  pub message: String,
  pub details: Option<String>,
}

/// Codes meaning "the relation or embedded join is not there".
const RELATION_MISSING_CODES: &[&str] = &["PGRST200", "PGRST205", "42P01"];

/// Decide the kind of an HTTP error response.
pub fn classify(status: u16, body: &ApiErrorBody) -> ErrorKind {
  let code = body.code.as_deref().unwrap_or("");
  if RELATION_MISSING_CODES.contains(&code) || mentions_missing_relation(&body.message) {
    return ErrorKind::RelationMissing;
  }

  match status {
    500..=599 => ErrorKind::Server,
    408 => ErrorKind::Timeout,
    401 | 403 => ErrorKind::Permission,
    404 => ErrorKind::NotFound,
    // 42501 = insufficient_privilege
    _ if code == "42501" => ErrorKind::Permission,
    _ => ErrorKind::Validation,
  }
}

fn mentions_missing_relation(message: &str) -> bool {
  let message = message.to_lowercase();
  (message.contains("relation") || message.contains("relationship"))
    && (message.contains("does not exist") || message.contains("could not find"))
}

/// Build a [`RemoteError`] from a failed response.
pub fn from_response(status: u16, raw_body: &str) -> RemoteError {
  let body: ApiErrorBody = serde_json::from_str(raw_body).unwrap_or_else(|_| ApiErrorBody {
    message: raw_body.trim().to_string(),
    ..Default::default()
  });
  let kind = classify(status, &body);

  let mut message = if body.message.is_empty() {
    format!("HTTP {}", status)
  } else {
    body.message.clone()
  };
  if let Some(details) = body.details.as_deref().filter(|d| !d.is_empty()) {
    message.push_str(&format!(" ({})", details));
  }

  let error = RemoteError::new(kind, message).with_status(status);
  match body.code {
    Some(code) => error.with_code(code),
    None => error,
  }
}

/// Classify a transport-level failure (no usable response).
pub fn from_transport(err: &reqwest::Error) -> RemoteError {
  let kind = if err.is_timeout() {
    ErrorKind::Timeout
  } else if err.is_decode() {
    ErrorKind::Decode
  } else if let Some(status) = err.status() {
    classify(status.as_u16(), &ApiErrorBody::default())
  } else {
    ErrorKind::Connection
  };

  let error = RemoteError::new(kind, err.to_string());
  match err.status() {
    Some(status) => error.with_status(status.as_u16()),
    None => error,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn body(code: &str, message: &str) -> ApiErrorBody {
    ApiErrorBody {
      code: Some(code.to_string()),
      message: message.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn test_server_errors_are_transient() {
    assert_eq!(classify(503, &ApiErrorBody::default()), ErrorKind::Server);
    assert!(ErrorKind::Server.is_transient());
    assert!(ErrorKind::Timeout.is_transient());
    assert!(ErrorKind::Connection.is_transient());
  }

  #[test]
  fn test_client_errors_are_not_transient() {
    assert_eq!(
      classify(409, &body("23505", "duplicate key")),
      ErrorKind::Validation
    );
    assert_eq!(classify(401, &ApiErrorBody::default()), ErrorKind::Permission);
    assert_eq!(classify(403, &body("42501", "denied")), ErrorKind::Permission);
    assert!(!ErrorKind::Validation.is_transient());
    assert!(!ErrorKind::Permission.is_transient());
  }

  #[test]
  fn test_missing_relation_by_code() {
    assert_eq!(
      classify(400, &body("PGRST200", "no relationship")),
      ErrorKind::RelationMissing
    );
    assert_eq!(
      classify(404, &body("42P01", "")),
      ErrorKind::RelationMissing
    );
  }

  #[test]
  fn test_missing_relation_by_message() {
    let body = ApiErrorBody {
      message: "relation \"public.whisky_translations\" does not exist".to_string(),
      ..Default::default()
    };
    assert_eq!(classify(500, &body), ErrorKind::RelationMissing);
  }

  #[test]
  fn test_from_response_keeps_code_and_details() {
    let err = from_response(
      400,
      r#"{"code":"23502","message":"null value in column","details":"name"}"#,
    );
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.code.as_deref(), Some("23502"));
    assert_eq!(err.status, Some(400));
    assert_eq!(err.message, "null value in column (name)");
  }

  #[test]
  fn test_from_response_plain_text_body() {
    let err = from_response(502, "Bad Gateway\n");
    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.message, "Bad Gateway");
    assert!(err.code.is_none());
  }
}
