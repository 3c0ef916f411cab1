//! Bounded retry with a fixed backoff table.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AccessError;
use crate::query::GenerationToken;
use crate::remote::RemoteError;

/// Default waits before the 1st, 2nd and 3rd retry.
pub const DEFAULT_DELAYS_MS: [u64; 3] = [300, 800, 1500];

/// Retries transient backend failures.
///
/// The number of retries is the length of the delay table; the wait before
/// retry `n` is `delays[n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  delays: Vec<Duration>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_millis(&DEFAULT_DELAYS_MS)
  }
}

impl RetryPolicy {
  pub fn new(delays: Vec<Duration>) -> Self {
    Self { delays }
  }

  pub fn from_millis(delays: &[u64]) -> Self {
    Self::new(delays.iter().copied().map(Duration::from_millis).collect())
  }

  /// Never retry.
  #[allow(dead_code)]
  pub fn none() -> Self {
    Self::new(Vec::new())
  }

  pub fn max_retries(&self) -> usize {
    self.delays.len()
  }

  /// Run `op` until it succeeds, fails non-transiently, or retries run out.
  ///
  /// The owning generation is checked before every attempt and on both sides
  /// of every wait; once it has moved on the chain stops with
  /// [`AccessError::Cancelled`].
  pub async fn run<T, F, Fut>(&self, token: &GenerationToken, mut op: F) -> Result<T, AccessError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let mut attempt = 0usize;

    loop {
      if !token.is_current() {
        return Err(AccessError::Cancelled);
      }

      let err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
      };

      if !err.is_transient() {
        debug!(kind = ?err.kind, "Not retrying non-transient error");
        return Err(err.into());
      }

      let Some(delay) = self.delays.get(attempt).copied() else {
        warn!(
          attempts = attempt + 1,
          max_retries = self.max_retries(),
          error = %err,
          "Retries exhausted"
        );
        return Err(err.into());
      };

      warn!(
        attempt = attempt + 1,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "Transient error, retrying"
      );

      if !token.is_current() {
        return Err(AccessError::Cancelled);
      }
      tokio::time::sleep(delay).await;
      if !token.is_current() {
        debug!(generation = token.generation(), "Retry chain superseded");
        return Err(AccessError::Cancelled);
      }

      attempt += 1;
    }
  }
}
