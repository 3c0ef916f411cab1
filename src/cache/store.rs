//! In-memory TTL cache with in-flight request deduplication.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct Entry<V> {
  payload: V,
  expires_at: Instant,
}

struct Inner<V, E> {
  entries: HashMap<String, Entry<V>>,
  in_flight: HashMap<String, (u64, Flight<V, E>)>,
  next_flight: u64,
}

impl<V: Clone, E> Inner<V, E> {
  /// Live entry for `key`; expired entries are dropped on the way.
  fn live(&mut self, key: &str, now: Instant) -> Option<V> {
    match self.entries.get(key) {
      Some(entry) if now <= entry.expires_at => Some(entry.payload.clone()),
      Some(_) => {
        self.entries.remove(key);
        None
      }
      None => None,
    }
  }

  /// Drop every expired entry.
  fn sweep(&mut self, now: Instant) {
    let before = self.entries.len();
    self.entries.retain(|_, entry| now <= entry.expires_at);
    let swept = before - self.entries.len();
    if swept > 0 {
      debug!(swept, "Expired cache entries dropped");
    }
  }
}

/// Key → payload map with per-entry expiry.
///
/// Concurrent [`deduplicate`](CacheStore::deduplicate) calls for the same key
/// share one producer future, so there is exactly one underlying call per key
/// per TTL window no matter how many callers ask.
pub struct CacheStore<V, E> {
  inner: Arc<Mutex<Inner<V, E>>>,
}

impl<V, E> CacheStore<V, E>
where
  V: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        entries: HashMap::new(),
        in_flight: HashMap::new(),
        next_flight: 0,
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner<V, E>> {
    // Every critical section leaves the maps consistent, so a poisoned
    // lock is still safe to use.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Get a live entry.
  #[allow(dead_code)]
  pub fn get(&self, key: &str) -> Option<V> {
    self.lock().live(key, Instant::now())
  }

  /// Store `payload` under `key` for `ttl`.
  #[allow(dead_code)]
  pub fn set(&self, key: &str, payload: V, ttl: Duration) {
    let now = Instant::now();
    let mut inner = self.lock();
    inner.sweep(now);
    inner.entries.insert(
      key.to_string(),
      Entry {
        payload,
        expires_at: now + ttl,
      },
    );
  }

  /// Drop entries matching `pattern`.
  ///
  /// A trailing `*` matches by prefix (`"records:*"`, or `"*"` for
  /// everything); otherwise the key must match exactly. Matching in-flight
  /// producers are detached so their results are not cached when they land.
  /// Returns the number of cached entries removed.
  pub fn invalidate(&self, pattern: &str) -> usize {
    let matches = |key: &str| match pattern.strip_suffix('*') {
      Some(prefix) => key.starts_with(prefix),
      None => key == pattern,
    };

    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|key, _| !matches(key));
    inner.in_flight.retain(|key, _| !matches(key));
    let removed = before - inner.entries.len();
    debug!(pattern, removed, "Cache invalidated");
    removed
  }

  /// Number of stored entries. Expired ones linger until the next write.
  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  /// Return the live entry for `key`, or join/start the producer for it.
  ///
  /// A successful result is cached for `ttl`. A failure is handed to every
  /// waiter and is not cached.
  pub async fn deduplicate<F, Fut>(&self, key: &str, producer: F, ttl: Duration) -> Result<V, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let flight = {
      let mut inner = self.lock();

      if let Some(payload) = inner.live(key, Instant::now()) {
        debug!(key, "Cache hit");
        return Ok(payload);
      }

      let joined = inner.in_flight.get(key).map(|(_, flight)| flight.clone());
      match joined {
        Some(flight) => {
          debug!(key, "Joining in-flight request");
          flight
        }
        None => {
          debug!(key, "Cache miss");
          inner.sweep(Instant::now());
          inner.next_flight += 1;
          let flight_id = inner.next_flight;
          let flight = self.start_flight(key, flight_id, producer(), ttl);
          inner
            .in_flight
            .insert(key.to_string(), (flight_id, flight.clone()));
          flight
        }
      }
    };

    flight.await
  }

  fn start_flight<Fut>(&self, key: &str, flight_id: u64, fut: Fut, ttl: Duration) -> Flight<V, E>
  where
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    let key = key.to_string();

    async move {
      let result = fut.await;

      let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
      let still_current = matches!(guard.in_flight.get(&key), Some((id, _)) if *id == flight_id);
      if still_current {
        guard.in_flight.remove(&key);
        if let Ok(payload) = &result {
          guard.entries.insert(
            key,
            Entry {
              payload: payload.clone(),
              expires_at: Instant::now() + ttl,
            },
          );
        }
      }

      result
    }
    .boxed()
    .shared()
  }
}

impl<V, E> Default for CacheStore<V, E>
where
  V: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<V, E> Clone for CacheStore<V, E> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  const TTL: Duration = Duration::from_secs(60);

  fn counting_producer(
    counter: &Arc<AtomicU32>,
    value: u32,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> {
    let counter = Arc::clone(counter);
    move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_calls_share_one_producer() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));

    let results = futures::future::join_all(
      (0..8).map(|i| cache.deduplicate("k", counting_producer(&calls, i), TTL)),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| *r == Ok(0)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_entry_expires_after_ttl() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let ttl = Duration::from_millis(1000);

    cache
      .deduplicate("k", counting_producer(&calls, 1), ttl)
      .await
      .unwrap();
    cache
      .deduplicate("k", counting_producer(&calls, 2), ttl)
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(ttl + Duration::from_millis(1)).await;

    let value = cache
      .deduplicate("k", counting_producer(&calls, 3), ttl)
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(value, 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_reaches_all_waiters_and_is_not_cached() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));

    let failing = |calls: &Arc<AtomicU32>| {
      let calls = Arc::clone(calls);
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err::<u32, _>("boom".to_string())
      }
    };

    let (a, b) = tokio::join!(
      cache.deduplicate("k", failing(&calls), TTL),
      cache.deduplicate("k", failing(&calls), TTL),
    );
    assert_eq!(a, Err("boom".to_string()));
    assert_eq!(b, Err("boom".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 0);

    let value = cache
      .deduplicate("k", counting_producer(&calls, 5), TTL)
      .await;
    assert_eq!(value, Ok(5));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_by_prefix() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    cache.set("records:a", 1, TTL);
    cache.set("records:b", 2, TTL);
    cache.set("record:7:x", 3, TTL);

    assert_eq!(cache.invalidate("records:*"), 2);
    assert_eq!(cache.get("records:a"), None);
    assert_eq!(cache.get("record:7:x"), Some(3));

    assert_eq!(cache.invalidate("record:7:x"), 1);
    assert_eq!(cache.len(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidated_flight_is_not_cached() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));

    let pending = cache.deduplicate("records:1", counting_producer(&calls, 1), TTL);
    let invalidate = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cache.invalidate("records:*");
    };
    let (value, _) = tokio::join!(pending, invalidate);

    assert_eq!(value, Ok(1));
    assert_eq!(cache.get("records:1"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entries_are_swept_on_write() {
    let cache: CacheStore<u32, String> = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    cache.set("records:a", 1, Duration::from_millis(100));
    cache.set("records:b", 2, Duration::from_millis(100));
    assert_eq!(cache.len(), 2);

    tokio::time::advance(Duration::from_millis(101)).await;
    cache
      .deduplicate("records:c", counting_producer(&calls, 3), TTL)
      .await
      .unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("records:c"), Some(3));

    tokio::time::advance(TTL + Duration::from_millis(1)).await;
    cache.set("record:1:x", 4, TTL);
    assert_eq!(cache.len(), 1);
  }
}
