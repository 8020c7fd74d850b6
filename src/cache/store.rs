//! Cache-aside store with stale-while-revalidate refreshes.

use chrono::{DateTime, Utc};
use futures::future::{self, AbortHandle, BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheResult, CacheValue, StalenessPolicy};
use crate::clock::Clock;
use crate::dispatch::Priority;
use crate::error::FetchError;

/// A fetched value, type-erased so fetches of any type share one map.
#[derive(Clone)]
struct Fetched {
  value: Arc<dyn Any + Send + Sync>,
  stored_at: DateTime<Utc>,
}

type FetchOutcome = Result<Option<Fetched>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
  id: u64,
  priority: Priority,
  fetch: SharedFetch,
  abort: AbortHandle,
}

/// Running fetches per key. A key holds more than one only when a more
/// urgent caller declined to wait on a less urgent fetch.
type FlightMap = HashMap<String, Vec<InFlight>>;

struct StoreInner<S> {
  storage: S,
  clock: Arc<dyn Clock>,
  in_flight: Mutex<FlightMap>,
  next_id: AtomicU64,
}

impl<S> StoreInner<S> {
  fn in_flight(&self) -> MutexGuard<'_, FlightMap> {
    self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Forget the in-flight fetch `id` for `key`, if still registered.
  fn finish(&self, key: &str, id: u64) {
    let mut in_flight = self.in_flight();
    if let Some(flights) = in_flight.get_mut(key) {
      flights.retain(|f| f.id != id);
      if flights.is_empty() {
        in_flight.remove(key);
      }
    }
  }
}

/// What a caller waits on after deciding to fetch.
enum Flight<T> {
  /// Another fetch stored a fresh value after the caller's first read
  Fresh(CacheEntry<T>),
  Pending(SharedFetch),
}

/// Removes the in-flight record when the fetch task ends, however it ends.
struct InFlightGuard<S> {
  inner: Arc<StoreInner<S>>,
  key: String,
  id: u64,
}

impl<S> Drop for InFlightGuard<S> {
  fn drop(&mut self) {
    self.inner.finish(&self.key, self.id);
  }
}

/// Cache-aside store.
///
/// Reads are served from storage when possible. Missing keys are fetched
/// and stored before returning; stale keys are returned immediately while
/// a refresh runs in the background. At most one fetch per key is in flight
/// and concurrent callers share it.
pub struct CacheAsideStore<S> {
  inner: Arc<StoreInner<S>>,
}

impl<S: CacheStorage> CacheAsideStore<S> {
  pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        storage,
        clock,
        in_flight: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  pub fn storage(&self) -> &S {
    &self.inner.storage
  }

  /// Return the value for `key`, fetching it if absent and refreshing it in
  /// the background if older than `ttl`.
  ///
  /// `fetcher` yields `Ok(None)` when no result is available (for example
  /// while offline); a miss then resolves to `Ok(None)` and nothing is
  /// stored.
  pub async fn get_or_fetch<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    fetcher: F,
  ) -> Result<Option<CacheResult<T>>, FetchError>
  where
    T: CacheValue,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, FetchError>> + Send + 'static,
  {
    self.get_or_fetch_at(key, ttl, Priority::default(), fetcher).await
  }

  /// As [`get_or_fetch`](Self::get_or_fetch), for a caller at `priority`.
  ///
  /// A caller only shares a running fetch for the key if that fetch is at
  /// least as urgent; otherwise it starts its own.
  pub async fn get_or_fetch_at<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    priority: Priority,
    fetcher: F,
  ) -> Result<Option<CacheResult<T>>, FetchError>
  where
    T: CacheValue,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, FetchError>> + Send + 'static,
  {
    let policy = StalenessPolicy::new(ttl);

    if let Some(entry) = self.peek::<T>(key) {
      if !policy.is_stale(self.inner.clock.now(), entry.stored_at) {
        debug!(key, "cache hit");
        return Ok(Some(CacheResult::fresh(entry.value, entry.stored_at)));
      }

      debug!(key, ttl_secs = ttl.as_secs(), "cache hit is stale, refreshing in background");
      return Ok(Some(match self.start_or_join::<T, F, Fut>(key, &policy, priority, fetcher, true) {
        Flight::Fresh(fresh) => CacheResult::fresh(fresh.value, fresh.stored_at),
        Flight::Pending(fetch) => {
          let refresh = Refresh {
            key: key.to_string(),
            fetch,
            _marker: PhantomData,
          };
          CacheResult::stale(entry.value, entry.stored_at, refresh)
        }
      }));
    }

    debug!(key, "cache miss");
    match self.start_or_join::<T, F, Fut>(key, &policy, priority, fetcher, false) {
      Flight::Fresh(fresh) => Ok(Some(CacheResult::fresh(fresh.value, fresh.stored_at))),
      Flight::Pending(fetch) => {
        let fetched = downcast::<T>(key, fetch.await)?;
        Ok(fetched.map(|(value, stored_at)| CacheResult::from_network(value, stored_at)))
      }
    }
  }

  /// Read the stored entry for `key` without fetching.
  ///
  /// Unreadable entries are logged and reported as absent.
  pub fn peek<T: CacheValue>(&self, key: &str) -> Option<CacheEntry<T>> {
    match self.inner.storage.get::<T>(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "unreadable cache entry, treating as missing");
        None
      }
    }
  }

  /// Number of fetches currently running.
  pub fn in_flight(&self) -> usize {
    self.inner.in_flight().values().map(Vec::len).sum()
  }

  /// Abort every running fetch. Aborted fetches write nothing and their
  /// waiters receive [`FetchError::Cancelled`].
  pub fn shutdown(&self) {
    let drained: Vec<(String, Vec<InFlight>)> = self.inner.in_flight().drain().collect();
    for (key, flights) in drained {
      for flight in flights {
        debug!(key, priority = ?flight.priority, "aborting in-flight fetch");
        flight.abort.abort();
      }
    }
  }

  fn start_or_join<T, F, Fut>(
    &self,
    key: &str,
    policy: &StalenessPolicy,
    priority: Priority,
    fetcher: F,
    refreshing: bool,
  ) -> Flight<T>
  where
    T: CacheValue,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, FetchError>> + Send + 'static,
  {
    let (work, fetch) = {
      let mut in_flight = self.inner.in_flight();
      let running = in_flight.get(key).map(Vec::as_slice).unwrap_or_default();
      if let Some(existing) = running
        .iter()
        .filter(|f| f.priority.serves(priority))
        .max_by_key(|f| f.priority.urgency())
      {
        debug!(key, running = ?existing.priority, "joining in-flight fetch");
        return Flight::Pending(existing.fetch.clone());
      }
      if !running.is_empty() {
        debug!(key, ?priority, "not waiting on a less urgent fetch");
      }

      // A fetch may have stored and deregistered since the caller's read
      if let Some(entry) = self.peek::<T>(key) {
        if !policy.is_stale(self.inner.clock.now(), entry.stored_at) {
          debug!(key, "entry refreshed concurrently");
          return Flight::Fresh(entry);
        }
      }

      let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
      let guard = InFlightGuard {
        inner: Arc::clone(&self.inner),
        key: key.to_string(),
        id,
      };

      let (tx, rx) = oneshot::channel::<FetchOutcome>();
      let fetch = rx
        .map(|received| received.unwrap_or(Err(FetchError::Cancelled)))
        .boxed()
        .shared();

      let (work, abort) = future::abortable(async move {
        let outcome = fetch_and_store::<S, T, F, Fut>(&guard.inner, &guard.key, fetcher).await;
        if refreshing {
          if let Err(e) = &outcome {
            warn!(key = %guard.key, error = %e, "background refresh failed, keeping cached value");
          }
        }
        // Deregister before publishing so later callers read the stored
        // value instead of joining a finished fetch.
        drop(guard);
        let _ = tx.send(outcome);
      });

      in_flight.entry(key.to_string()).or_default().push(InFlight {
        id,
        priority,
        fetch: fetch.clone(),
        abort,
      });
      (work, fetch)
    };

    tokio::spawn(work);
    Flight::Pending(fetch)
  }
}

impl<S> Clone for CacheAsideStore<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

async fn fetch_and_store<S, T, F, Fut>(inner: &StoreInner<S>, key: &str, fetcher: F) -> FetchOutcome
where
  S: CacheStorage,
  T: CacheValue,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Option<T>, FetchError>>,
{
  let value = match fetcher().await? {
    Some(value) => value,
    None => {
      debug!(key, "fetch produced no result");
      return Ok(None);
    }
  };

  let entry = CacheEntry {
    key: key.to_string(),
    value,
    stored_at: inner.clock.now(),
  };
  let written = inner.storage.put(&entry).map_err(FetchError::storage)?;
  if !written {
    debug!(key, "newer entry already stored");
  }

  Ok(Some(Fetched {
    value: Arc::new(entry.value),
    stored_at: entry.stored_at,
  }))
}

fn downcast<T: CacheValue>(key: &str, outcome: FetchOutcome) -> Result<Option<(T, DateTime<Utc>)>, FetchError> {
  match outcome? {
    None => Ok(None),
    Some(fetched) => fetched
      .value
      .downcast_ref::<T>()
      .map(|value| Some((value.clone(), fetched.stored_at)))
      .ok_or_else(|| FetchError::Other(format!("in-flight fetch for '{}' produced a different type", key))),
  }
}

/// Handle to a background refresh started by a stale read.
///
/// Awaiting it is optional; the refresh runs either way.
pub struct Refresh<T> {
  key: String,
  fetch: SharedFetch,
  _marker: PhantomData<fn() -> T>,
}

impl<T: CacheValue> Refresh<T> {
  /// Wait for the refresh and return the new value, `None` when nothing was
  /// fetched, or the failure that left the stale value in place.
  pub async fn outcome(self) -> Result<Option<T>, FetchError> {
    Ok(downcast::<T>(&self.key, self.fetch.await)?.map(|(value, _)| value))
  }
}

impl<T> Clone for Refresh<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      fetch: self.fetch.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T> fmt::Debug for Refresh<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Refresh").field("key", &self.key).finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::clock::ManualClock;
  use chrono::TimeZone;
  use std::sync::atomic::AtomicUsize;
  use tokio::sync::oneshot;

  const TEN_MINUTES: Duration = Duration::from_secs(600);

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 1, 6, 8, 0, 0).unwrap()
  }

  fn store() -> (CacheAsideStore<MemoryStorage>, ManualClock) {
    let clock = ManualClock::new(t0());
    (CacheAsideStore::new(MemoryStorage::new(), Arc::new(clock.clone())), clock)
  }

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  /// Fetcher that counts calls and returns `value` immediately.
  fn counting<T: Send + 'static>(
    calls: &Arc<AtomicUsize>,
    value: T,
  ) -> impl FnOnce() -> futures::future::Ready<Result<Option<T>, FetchError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      futures::future::ready(Ok(Some(value)))
    }
  }

  /// Fetcher that counts calls and waits for `release` before returning.
  fn gated<T: Send + 'static>(
    calls: &Arc<AtomicUsize>,
    release: oneshot::Receiver<Result<Option<T>, FetchError>>,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<Option<T>, FetchError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      async move { release.await.unwrap_or(Err(FetchError::Cancelled)) }.boxed()
    }
  }

  fn unused<T: Send + 'static>(
  ) -> impl FnOnce() -> futures::future::Ready<Result<Option<T>, FetchError>> + Send + 'static {
    || -> futures::future::Ready<Result<Option<T>, FetchError>> { panic!("fetcher must not be called") }
  }

  #[tokio::test]
  async fn test_miss_fetches_once_and_stores() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = store
      .get_or_fetch("conferences", TEN_MINUTES, counting(&calls, names(&["ConfA"])))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.data, names(&["ConfA"]));
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.cached_at, t0());
    assert_eq!(store.peek::<Vec<String>>("conferences").unwrap().value, names(&["ConfA"]));
    assert_eq!(store.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_fresh_hit_does_not_fetch() {
    let (store, clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    store
      .get_or_fetch("conferences", TEN_MINUTES, counting(&calls, names(&["ConfA"])))
      .await
      .unwrap();

    clock.advance(chrono::Duration::minutes(5));
    let result = store
      .get_or_fetch("conferences", TEN_MINUTES, unused::<Vec<String>>())
      .await
      .unwrap()
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert!(result.refresh().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_hit_returns_cached_and_refreshes_once() {
    let (store, clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    store
      .get_or_fetch("conferences", TEN_MINUTES, counting(&calls, names(&["ConfA"])))
      .await
      .unwrap();
    clock.advance(chrono::Duration::minutes(11));

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel();
    let mut first = store
      .get_or_fetch("conferences", TEN_MINUTES, gated(&refresh_calls, gate))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(first.data, names(&["ConfA"]));
    assert_eq!(first.source, CacheSource::CacheStale);
    assert_eq!(store.in_flight(), 1);

    // A second stale read joins the running refresh
    let second = store
      .get_or_fetch("conferences", TEN_MINUTES, unused::<Vec<String>>())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(second.data, names(&["ConfA"]));

    release.send(Ok(Some(names(&["ConfA", "ConfB"])))).unwrap();
    let refreshed = first.take_refresh().unwrap().outcome().await.unwrap();
    assert_eq!(refreshed, Some(names(&["ConfA", "ConfB"])));

    let joined = second.refresh().unwrap().clone().outcome().await.unwrap();
    assert_eq!(joined, refreshed);
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_ten_minute_ttl_scenario() {
    let (store, clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));

    // T0: stored [ConfA]
    store
      .get_or_fetch("conferences", TEN_MINUTES, counting(&calls, names(&["ConfA"])))
      .await
      .unwrap();

    // T0+5min: fresh, no fetch
    clock.set(t0() + chrono::Duration::minutes(5));
    let at_5 = store
      .get_or_fetch("conferences", TEN_MINUTES, unused::<Vec<String>>())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(at_5.data, names(&["ConfA"]));

    // T0+11min: stale, old value now, refresh completes 200ms later
    clock.set(t0() + chrono::Duration::minutes(11));
    let refresh_clock = clock.clone();
    let refresh_calls = Arc::clone(&calls);
    let mut at_11 = store
      .get_or_fetch("conferences", TEN_MINUTES, move || async move {
        refresh_calls.fetch_add(1, Ordering::SeqCst);
        refresh_clock.advance(chrono::Duration::milliseconds(200));
        Ok(Some(names(&["ConfA", "ConfB"])))
      })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(at_11.data, names(&["ConfA"]));
    at_11.take_refresh().unwrap().outcome().await.unwrap();

    let stored = store.peek::<Vec<String>>("conferences").unwrap();
    assert_eq!(
      stored.stored_at,
      t0() + chrono::Duration::minutes(11) + chrono::Duration::milliseconds(200)
    );

    // T0+12min: the refreshed value, fresh
    clock.set(t0() + chrono::Duration::minutes(12));
    let at_12 = store
      .get_or_fetch("conferences", TEN_MINUTES, unused::<Vec<String>>())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(at_12.data, names(&["ConfA", "ConfB"]));
    assert_eq!(at_12.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_miss_failure_propagates_and_stores_nothing() {
    let (store, _clock) = store();

    let err = store
      .get_or_fetch::<Vec<String>, _, _>("conferences", TEN_MINUTES, || async {
        Err(FetchError::Other("server down".to_string()))
      })
      .await
      .unwrap_err();

    assert!(matches!(err, FetchError::Other(ref msg) if msg == "server down"));
    assert!(store.peek::<Vec<String>>("conferences").is_none());
    assert_eq!(store.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_miss_without_result_is_unavailable() {
    let (store, _clock) = store();

    let result = store
      .get_or_fetch::<Vec<String>, _, _>("conferences", TEN_MINUTES, || async { Ok(None) })
      .await
      .unwrap();

    assert!(result.is_none());
    assert!(store.peek::<Vec<String>>("conferences").is_none());
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_stale_entry() {
    let (store, clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    store
      .get_or_fetch("conferences", TEN_MINUTES, counting(&calls, names(&["ConfA"])))
      .await
      .unwrap();
    clock.advance(chrono::Duration::hours(1));

    let mut stale = store
      .get_or_fetch::<Vec<String>, _, _>("conferences", TEN_MINUTES, || async {
        Err(FetchError::Other("timeout".to_string()))
      })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stale.data, names(&["ConfA"]));

    // Only the caller awaiting the refresh sees the failure
    assert!(stale.take_refresh().unwrap().outcome().await.is_err());
    let entry = store.peek::<Vec<String>>("conferences").unwrap();
    assert_eq!(entry.value, names(&["ConfA"]));
    assert_eq!(entry.stored_at, t0());
  }

  #[tokio::test]
  async fn test_concurrent_misses_share_one_fetch() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel();

    let first = {
      let store = store.clone();
      let fetcher = gated(&calls, gate);
      tokio::spawn(async move { store.get_or_fetch("codemash-2015", TEN_MINUTES, fetcher).await })
    };
    while store.in_flight() == 0 {
      tokio::task::yield_now().await;
    }

    let second = {
      let store = store.clone();
      tokio::spawn(async move {
        store
          .get_or_fetch("codemash-2015", TEN_MINUTES, unused::<String>())
          .await
      })
    };
    tokio::task::yield_now().await;

    release.send(Ok(Some("CodeMash 2015".to_string()))).unwrap();
    let first = first.await.unwrap().unwrap().unwrap();
    let second = second.await.unwrap().unwrap().unwrap();

    assert_eq!(first.data, "CodeMash 2015");
    assert_eq!(second.data, "CodeMash 2015");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_different_keys_fetch_independently() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let (_hold, gate) = oneshot::channel::<Result<Option<String>, FetchError>>();

    let blocked = {
      let store = store.clone();
      let fetcher = gated(&calls, gate);
      tokio::spawn(async move { store.get_or_fetch("codemash-2015", TEN_MINUTES, fetcher).await })
    };
    while store.in_flight() == 0 {
      tokio::task::yield_now().await;
    }

    let other = store
      .get_or_fetch("codemash-2016", TEN_MINUTES, counting(&calls, "CodeMash 2016".to_string()))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(other.data, "CodeMash 2016");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    store.shutdown();
    assert!(matches!(blocked.await.unwrap(), Err(FetchError::Cancelled)));
  }

  #[tokio::test]
  async fn test_shutdown_abandons_in_flight_fetch() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel();

    let waiter = {
      let store = store.clone();
      let fetcher = gated(&calls, gate);
      tokio::spawn(async move { store.get_or_fetch("conferences", TEN_MINUTES, fetcher).await })
    };
    while store.in_flight() == 0 {
      tokio::task::yield_now().await;
    }

    store.shutdown();
    let _ = release.send(Ok(Some(names(&["ConfA"]))));

    assert!(matches!(waiter.await.unwrap(), Err(FetchError::Cancelled)));
    assert_eq!(store.in_flight(), 0);
    assert!(store.peek::<Vec<String>>("conferences").is_none());
  }

  #[tokio::test]
  async fn test_urgent_caller_does_not_wait_on_speculative_fetch() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel();

    let speculative = {
      let store = store.clone();
      let fetcher = gated::<String>(&calls, gate);
      tokio::spawn(async move {
        store
          .get_or_fetch_at("codemash-2015", TEN_MINUTES, Priority::Speculative, fetcher)
          .await
      })
    };
    while store.in_flight() == 0 {
      tokio::task::yield_now().await;
    }

    let direct = store
      .get_or_fetch("codemash-2015", TEN_MINUTES, counting(&calls, "CodeMash 2015".to_string()))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(direct.data, "CodeMash 2015");
    assert_eq!(direct.source, CacheSource::Network);

    // The dropped speculative fetch fails only its own caller
    release
      .send(Err(FetchError::LaneSaturated {
        priority: Priority::Speculative,
      }))
      .unwrap();
    assert!(matches!(
      speculative.await.unwrap(),
      Err(FetchError::LaneSaturated { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.peek::<String>("codemash-2015").unwrap().value, "CodeMash 2015");
    assert_eq!(store.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_speculative_caller_joins_urgent_fetch() {
    let (store, _clock) = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel();

    let direct = {
      let store = store.clone();
      let fetcher = gated(&calls, gate);
      tokio::spawn(async move { store.get_or_fetch("codemash-2016", TEN_MINUTES, fetcher).await })
    };
    while store.in_flight() == 0 {
      tokio::task::yield_now().await;
    }

    let speculative = {
      let store = store.clone();
      tokio::spawn(async move {
        store
          .get_or_fetch_at("codemash-2016", TEN_MINUTES, Priority::Speculative, unused::<String>())
          .await
      })
    };
    tokio::task::yield_now().await;
    assert_eq!(store.in_flight(), 1);

    release.send(Ok(Some("CodeMash 2016".to_string()))).unwrap();
    assert_eq!(direct.await.unwrap().unwrap().unwrap().data, "CodeMash 2016");
    assert_eq!(speculative.await.unwrap().unwrap().unwrap().data, "CodeMash 2016");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fetch_rechecks_storage_before_starting() {
    let (store, _clock) = store();
    let policy = StalenessPolicy::new(TEN_MINUTES);

    // Written by a fetch that finished after this caller saw a miss
    store
      .storage()
      .put(&CacheEntry {
        key: "conferences".to_string(),
        value: names(&["ConfA"]),
        stored_at: t0(),
      })
      .unwrap();

    let flight = store.start_or_join::<Vec<String>, _, _>(
      "conferences",
      &policy,
      Priority::UserInitiated,
      unused::<Vec<String>>(),
      false,
    );

    assert!(matches!(flight, Flight::Fresh(ref entry) if entry.value == names(&["ConfA"])));
    assert_eq!(store.in_flight(), 0);
  }
}
