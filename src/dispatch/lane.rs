//! A single execution lane: one transport client plus its concurrency,
//! pacing and retry budget.

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use super::Priority;
use crate::error::FetchError;
use crate::retry::{RetryExecutor, RetryPolicy, RetrySettings};

/// Per-lane settings, as read from configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LaneConfig {
  /// Requests allowed in flight at once on this lane.
  pub max_concurrent: usize,
  /// Minimum gap between the start of two requests, in milliseconds.
  pub min_interval_ms: u64,
  /// Refuse new work instead of queueing when every slot is taken.
  pub drop_when_saturated: bool,
  /// Optional per-request timeout applied by the transport, in seconds.
  pub timeout_secs: Option<u64>,
  pub retry: RetrySettings,
}

impl LaneConfig {
  /// Defaults for a lane of the given priority.
  pub fn for_priority(priority: Priority) -> Self {
    let base = Self {
      max_concurrent: 4,
      min_interval_ms: 0,
      drop_when_saturated: false,
      timeout_secs: Some(30),
      retry: RetrySettings::default(),
    };
    match priority {
      Priority::Background => Self {
        max_concurrent: 1,
        min_interval_ms: 250,
        ..base
      },
      Priority::UserInitiated => base,
      Priority::Speculative => Self {
        max_concurrent: 2,
        drop_when_saturated: true,
        ..base
      },
    }
  }
}

impl Default for LaneConfig {
  fn default() -> Self {
    Self::for_priority(Priority::UserInitiated)
  }
}

/// An execution lane bound to one priority.
pub struct PriorityLane<C> {
  priority: Priority,
  client: Arc<C>,
  permits: Semaphore,
  capacity: usize,
  drop_when_saturated: bool,
  min_interval: Duration,
  last_start: Mutex<Option<Instant>>,
  retry: RetryExecutor,
}

impl<C> PriorityLane<C> {
  pub fn new(priority: Priority, client: C, config: &LaneConfig) -> Self {
    Self {
      priority,
      client: Arc::new(client),
      permits: Semaphore::new(config.max_concurrent.max(1)),
      capacity: config.max_concurrent.max(1),
      drop_when_saturated: config.drop_when_saturated,
      min_interval: Duration::from_millis(config.min_interval_ms),
      last_start: Mutex::new(None),
      retry: RetryExecutor::new(RetryPolicy::from(&config.retry)),
    }
  }

  /// Replace the retry policy built from configuration.
  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.retry = RetryExecutor::new(policy);
    self
  }

  pub fn priority(&self) -> Priority {
    self.priority
  }

  pub fn client(&self) -> &Arc<C> {
    &self.client
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    self.retry.policy()
  }

  /// Requests this lane runs at once.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Free slots right now.
  pub fn available(&self) -> usize {
    self.permits.available_permits()
  }

  /// Run `operation` on this lane under its retry policy.
  ///
  /// Every attempt holds a slot only while it runs; backoff sleeps happen
  /// outside the slot so a retrying request does not block its neighbours.
  pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, FetchError>
  where
    F: FnMut(Arc<C>) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    if self.drop_when_saturated && self.permits.available_permits() == 0 {
      debug!(priority = ?self.priority, "lane saturated, dropping request");
      return Err(FetchError::LaneSaturated {
        priority: self.priority,
      });
    }

    self
      .retry
      .run(|| {
        let attempt = operation(Arc::clone(&self.client));
        async move {
          let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;
          self.pace().await;
          attempt.await
        }
      })
      .await
  }

  /// Wait until `min_interval` has passed since the previous request start.
  async fn pace(&self) {
    if self.min_interval.is_zero() {
      return;
    }
    let mut last_start = self.last_start.lock().await;
    if let Some(previous) = *last_start {
      let next = previous + self.min_interval;
      if next > Instant::now() {
        tokio::time::sleep_until(next).await;
      }
    }
    *last_start = Some(Instant::now());
  }
}
