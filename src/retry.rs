//! Bounded retry with a configurable backoff schedule.

use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;

type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
type RetryPredicate = Arc<dyn Fn(&FetchError) -> bool + Send + Sync>;

/// Delay inserted before each retry.
///
/// `retry` is 1-based: the delay before the second attempt is `delay(1)`.
#[derive(Clone, Default)]
pub enum Backoff {
  /// Retry immediately.
  #[default]
  None,
  /// Same delay before every retry.
  Constant(Duration),
  /// `base * 2^retry`. With a one-second base: 2s, 4s, 8s, ...
  Exponential { base: Duration },
  Custom(BackoffFn),
}

impl Backoff {
  pub fn custom<F>(f: F) -> Self
  where
    F: Fn(u32) -> Duration + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  pub fn delay(&self, retry: u32) -> Duration {
    match self {
      Self::None => Duration::ZERO,
      Self::Constant(d) => *d,
      Self::Exponential { base } => {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
      }
      Self::Custom(f) => f(retry),
    }
  }
}

impl fmt::Debug for Backoff {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::None => f.write_str("None"),
      Self::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
      Self::Exponential { base } => f.debug_struct("Exponential").field("base", base).finish(),
      Self::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// Which failures are worth another attempt.
#[derive(Clone, Default)]
pub enum RetryOn {
  /// Every error.
  #[default]
  Any,
  /// Connection failures, timeouts and HTTP error statuses only.
  Transport,
  Custom(RetryPredicate),
}

impl RetryOn {
  pub fn custom<F>(f: F) -> Self
  where
    F: Fn(&FetchError) -> bool + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  pub fn is_retryable(&self, err: &FetchError) -> bool {
    match self {
      Self::Any => true,
      Self::Transport => err.is_transport(),
      Self::Custom(f) => f(err),
    }
  }
}

impl fmt::Debug for RetryOn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Any => f.write_str("Any"),
      Self::Transport => f.write_str("Transport"),
      Self::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: Backoff,
  pub retry_on: RetryOn,
}

impl RetryPolicy {
  /// `max_attempts` tries with no delay, retrying any error.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      backoff: Backoff::None,
      retry_on: RetryOn::Any,
    }
  }

  /// `max_attempts` tries sleeping `2^retry` seconds in between.
  pub fn exponential(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      backoff: Backoff::Exponential {
        base: Duration::from_secs(1),
      },
      retry_on: RetryOn::Any,
    }
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
    self.retry_on = retry_on;
    self
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::immediate(5)
  }
}

/// Runs an operation until it succeeds or the policy gives up.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
  policy: RetryPolicy,
}

impl RetryExecutor {
  pub fn new(policy: RetryPolicy) -> Self {
    Self { policy }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Run `operation`, retrying per the policy.
  ///
  /// On exhaustion the error from the final attempt is returned as-is.
  pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, FetchError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    let max_attempts = self.policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      match operation().await {
        Ok(value) => {
          if attempt > 1 {
            debug!(attempt, "operation succeeded after retrying");
          }
          return Ok(value);
        }
        Err(err) if !self.policy.retry_on.is_retryable(&err) => {
          debug!(attempt, error = %err, "error is not retryable");
          return Err(err);
        }
        Err(err) if attempt >= max_attempts => {
          warn!(attempts = attempt, error = %err, "retries exhausted");
          return Err(err);
        }
        Err(err) => {
          let delay = self.policy.backoff.delay(attempt);
          warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
          );
          if !delay.is_zero() {
            tokio::time::sleep(delay).await;
          }
          attempt += 1;
        }
      }
    }
  }
}

/// Serde-friendly form of [`RetryPolicy`] used in configuration files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
  pub max_attempts: u32,
  pub backoff: BackoffKind,
  /// Base delay in milliseconds for `constant` and `exponential` backoff.
  pub base_delay_ms: u64,
  pub retry_on: RetryOnKind,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
  #[default]
  None,
  Constant,
  Exponential,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryOnKind {
  #[default]
  Any,
  Transport,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      backoff: BackoffKind::None,
      base_delay_ms: 1000,
      retry_on: RetryOnKind::Any,
    }
  }
}

impl From<&RetrySettings> for RetryPolicy {
  fn from(settings: &RetrySettings) -> Self {
    let base = Duration::from_millis(settings.base_delay_ms);
    let backoff = match settings.backoff {
      BackoffKind::None => Backoff::None,
      BackoffKind::Constant => Backoff::Constant(base),
      BackoffKind::Exponential => Backoff::Exponential { base },
    };
    let retry_on = match settings.retry_on {
      RetryOnKind::Any => RetryOn::Any,
      RetryOnKind::Transport => RetryOn::Transport,
    };
    RetryPolicy {
      max_attempts: settings.max_attempts,
      backoff,
      retry_on,
    }
  }
}
