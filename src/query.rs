//! Generation-gated load state for re-triggerable async loads.
//!
//! A [`LoadStream`] owns the observable state of one logical stream of loads
//! (a list view, a detail view). Every load begins by taking a
//! [`GenerationToken`]; its result is only committed if no newer load has
//! begun since. Older results, successes and failures alike, are dropped.
//!
//! # Example
//!
//! ```ignore
//! let stream: LoadStream<Vec<Record>, AccessError> = LoadStream::new();
//!
//! let token = stream.begin();
//! let result = catalog.list(&query, &token).await;
//! if !stream.commit(&token, result) {
//!     // superseded by a newer load, nothing changed
//! }
//!
//! match stream.snapshot() {
//!     s if s.loading => render_spinner(),
//!     s => render(s.data, s.error),
//! }
//! ```
//!
//! Cancellation is cooperative: the superseded operation keeps running, its
//! result is simply ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Monotonic generation counter shared by the loads of one stream.
#[derive(Debug, Clone, Default)]
pub struct Generations {
  counter: Arc<AtomicU64>,
}

impl Generations {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a new generation, invalidating every earlier token.
  pub fn next(&self) -> GenerationToken {
    let generation = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
    GenerationToken {
      counter: Arc::clone(&self.counter),
      generation,
    }
  }

  pub fn current(&self) -> u64 {
    self.counter.load(Ordering::SeqCst)
  }
}

/// Proof of which generation a piece of work belongs to.
///
/// Passed explicitly into every call that may suspend, so stale work can stop
/// early (see the retry policy) and stale results are never committed.
#[derive(Debug, Clone)]
pub struct GenerationToken {
  counter: Arc<AtomicU64>,
  generation: u64,
}

impl GenerationToken {
  /// A token that belongs to no shared stream and is therefore always current.
  pub fn detached() -> Self {
    Generations::new().next()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// No newer generation has been started.
  pub fn is_current(&self) -> bool {
    self.counter.load(Ordering::SeqCst) == self.generation
  }
}

/// Observable state of a stream.
#[derive(Debug, Clone)]
pub struct QueryState<T, E> {
  /// Last committed data; kept while a newer load is running
  pub data: Option<T>,
  /// Last committed error; cleared by a successful commit
  pub error: Option<E>,
  pub loading: bool,
  /// Generation of the last commit
  pub committed_generation: Option<u64>,
  /// Number of results committed so far
  pub commits: u64,
  fetched_at: Option<Instant>,
}

impl<T, E> Default for QueryState<T, E> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      loading: false,
      committed_generation: None,
      commits: 0,
      fetched_at: None,
    }
  }
}

#[allow(dead_code)]
impl<T, E> QueryState<T, E> {
  pub fn is_idle(&self) -> bool {
    !self.loading && self.commits == 0
  }

  pub fn is_success(&self) -> bool {
    !self.loading && self.error.is_none() && self.data.is_some()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  /// Data is older than `stale_time`, or there is none yet.
  pub fn is_stale(&self, stale_time: Duration) -> bool {
    self
      .fetched_at
      .map(|t| t.elapsed() > stale_time)
      .unwrap_or(true)
  }
}

/// Generation-gated state holder for one logical stream of loads.
pub struct LoadStream<T, E> {
  generations: Generations,
  state: Arc<Mutex<QueryState<T, E>>>,
}

impl<T, E> LoadStream<T, E> {
  pub fn new() -> Self {
    Self {
      generations: Generations::new(),
      state: Arc::new(Mutex::new(QueryState::default())),
    }
  }

  fn lock(&self) -> MutexGuard<'_, QueryState<T, E>> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Begin a load: bump the generation and flag loading.
  pub fn begin(&self) -> GenerationToken {
    let token = self.generations.next();
    self.lock().loading = true;
    debug!(generation = token.generation(), "Load started");
    token
  }

  /// Apply a result if `token` is still the current generation.
  ///
  /// Returns `false` and leaves data, error and loading untouched when a newer
  /// load has begun since `token` was taken.
  pub fn commit(&self, token: &GenerationToken, result: Result<T, E>) -> bool {
    let mut state = self.lock();
    // Checked under the state lock so a concurrent begin() cannot slip in
    // between the check and the write.
    if !token.is_current() {
      debug!(
        generation = token.generation(),
        current = self.generations.current(),
        "Discarding stale result"
      );
      return false;
    }

    match result {
      Ok(data) => {
        state.data = Some(data);
        state.error = None;
        state.fetched_at = Some(Instant::now());
      }
      Err(error) => {
        state.error = Some(error);
      }
    }
    state.loading = false;
    state.committed_generation = Some(token.generation());
    state.commits += 1;
    true
  }

  /// Invalidate any in-flight load without starting a new one.
  #[allow(dead_code)]
  pub fn cancel(&self) {
    let mut state = self.lock();
    self.generations.next();
    state.loading = false;
  }

  #[allow(dead_code)]
  pub fn current_generation(&self) -> u64 {
    self.generations.current()
  }

  #[allow(dead_code)]
  pub fn is_loading(&self) -> bool {
    self.lock().loading
  }
}

impl<T: Clone, E: Clone> LoadStream<T, E> {
  /// Copy of the current state.
  pub fn snapshot(&self) -> QueryState<T, E> {
    self.lock().clone()
  }

  #[allow(dead_code)]
  pub fn data(&self) -> Option<T> {
    self.lock().data.clone()
  }

  #[allow(dead_code)]
  pub fn error(&self) -> Option<E> {
    self.lock().error.clone()
  }
}

impl<T, E> Default for LoadStream<T, E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T, E> Clone for LoadStream<T, E> {
  fn clone(&self) -> Self {
    Self {
      generations: self.generations.clone(),
      state: Arc::clone(&self.state),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn delayed<T>(ms: u64, value: T) -> T {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    value
  }

  async fn load(stream: &LoadStream<&'static str, String>, ms: u64, value: &'static str) -> bool {
    let token = stream.begin();
    let result = delayed(ms, Ok(value)).await;
    stream.commit(&token, result)
  }

  #[test]
  fn test_token_goes_stale_when_next_generation_starts() {
    let generations = Generations::new();
    let first = generations.next();
    assert!(first.is_current());

    let second = generations.next();
    assert!(!first.is_current());
    assert!(second.is_current());
    assert_eq!(second.generation(), first.generation() + 1);
  }

  #[test]
  fn test_detached_token_is_current() {
    assert!(GenerationToken::detached().is_current());
  }

  #[tokio::test(start_paused = true)]
  async fn test_newer_load_wins_when_older_finishes_last() {
    let stream = LoadStream::new();
    let (a, b) = tokio::join!(load(&stream, 100, "A"), async {
      tokio::time::sleep(Duration::from_millis(1)).await;
      load(&stream, 10, "B").await
    });

    assert!(!a);
    assert!(b);
    let state = stream.snapshot();
    assert_eq!(state.data, Some("B"));
    assert!(!state.loading);
    assert_eq!(state.commits, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_newer_load_wins_when_older_finishes_first() {
    let stream = LoadStream::new();
    let (a, b) = tokio::join!(load(&stream, 10, "A"), async {
      tokio::time::sleep(Duration::from_millis(1)).await;
      load(&stream, 100, "B").await
    });

    assert!(!a);
    assert!(b);
    let state = stream.snapshot();
    assert_eq!(state.data, Some("B"));
    assert!(!state.loading);
    assert_eq!(state.commits, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_stays_set_while_newer_load_runs() {
    let stream: LoadStream<&'static str, String> = LoadStream::new();
    let old = stream.begin();
    let new = stream.begin();

    assert!(!stream.commit(&old, Ok("old")));
    assert!(stream.is_loading());
    assert_eq!(stream.data(), None);

    assert!(stream.commit(&new, Ok("new")));
    assert!(!stream.is_loading());
  }

  #[test]
  fn test_stale_error_is_discarded() {
    let stream: LoadStream<u32, String> = LoadStream::new();
    let old = stream.begin();
    let new = stream.begin();
    assert!(stream.commit(&new, Ok(1)));
    assert!(!stream.commit(&old, Err("late failure".to_string())));

    let state = stream.snapshot();
    assert!(state.is_success());
    assert_eq!(state.error, None);
  }

  #[test]
  fn test_error_keeps_previous_data() {
    let stream: LoadStream<u32, String> = LoadStream::new();
    let first = stream.begin();
    stream.commit(&first, Ok(7));
    let second = stream.begin();
    stream.commit(&second, Err("offline".to_string()));

    let state = stream.snapshot();
    assert_eq!(state.data, Some(7));
    assert_eq!(state.error.as_deref(), Some("offline"));
    assert!(!state.loading);
  }

  #[test]
  fn test_cancel_discards_in_flight() {
    let stream: LoadStream<u32, String> = LoadStream::new();
    let token = stream.begin();
    stream.cancel();
    assert!(!stream.is_loading());
    assert!(!stream.commit(&token, Ok(1)));
    assert!(stream.snapshot().is_idle());
  }

  #[tokio::test(start_paused = true)]
  async fn test_state_is_stale_after_stale_time() {
    let stream: LoadStream<u32, String> = LoadStream::new();
    assert!(stream.snapshot().is_stale(Duration::from_secs(60)));

    let token = stream.begin();
    stream.commit(&token, Ok(1));
    assert!(!stream.snapshot().is_stale(Duration::from_secs(60)));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(stream.snapshot().is_stale(Duration::from_secs(60)));
  }
}
