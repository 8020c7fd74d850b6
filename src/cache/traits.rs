//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::store::Refresh;

/// Values that can live in the cache.
///
/// Blanket-implemented; the bounds are what storage and background refresh
/// need.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A cached value and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub key: String,
  pub value: T,
  pub stored_at: DateTime<Utc>,
}

/// Decides whether an entry is old enough to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
  ttl: Duration,
}

impl StalenessPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// An entry is stale once strictly more than `ttl` has elapsed since it
  /// was stored. Timestamps in the future are never stale.
  pub fn is_stale(&self, now: DateTime<Utc>, stored_at: DateTime<Utc>) -> bool {
    match (now - stored_at).to_std() {
      Ok(elapsed) => elapsed > self.ttl,
      Err(_) => false,
    }
  }
}

/// Result from a cache read, with metadata about where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was written to the cache
  pub cached_at: DateTime<Utc>,
  refresh: Option<Refresh<T>>,
}

impl<T> CacheResult<T> {
  /// Data that was just fetched and stored.
  pub fn from_network(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at,
      refresh: None,
    }
  }

  /// Cached data still inside its freshness window.
  pub fn fresh(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at,
      refresh: None,
    }
  }

  /// Cached data past its freshness window; `refresh` resolves once the
  /// background fetch finishes.
  pub fn stale(data: T, cached_at: DateTime<Utc>, refresh: Refresh<T>) -> Self {
    Self {
      data,
      source: CacheSource::CacheStale,
      cached_at,
      refresh: Some(refresh),
    }
  }

  pub fn is_stale(&self) -> bool {
    self.source == CacheSource::CacheStale
  }

  /// Handle to the background refresh, present only for stale results.
  pub fn refresh(&self) -> Option<&Refresh<T>> {
    self.refresh.as_ref()
  }

  pub fn take_refresh(&mut self) -> Option<Refresh<T>> {
    self.refresh.take()
  }

  pub fn into_data(self) -> T {
    self.data
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the network for this call
  Network,
  /// From cache, still considered fresh
  CacheFresh,
  /// From cache, past its TTL; a refresh is running in the background
  CacheStale,
}
