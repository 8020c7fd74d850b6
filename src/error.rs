//! Error types for the fetch-and-cache layer.

use std::sync::Arc;

use crate::dispatch::Priority;

/// Failure of a remote fetch or of writing its result into the cache.
///
/// Being offline is not represented here: the dispatcher reports it as
/// `Ok(None)` so it never enters the retry loop.
///
/// `Clone` because a single in-flight fetch is shared by every caller
/// waiting on the same key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
  /// Connection failure, timeout or any other transport-level error.
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: Arc<reqwest::Error>,
  },

  /// The server answered with a non-success status.
  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  /// The body could not be decoded into the expected type.
  #[error("failed to decode response from {url}: {message}")]
  Decode { url: String, message: String },

  /// A lane configured to drop work under load had no free slot.
  #[error("{priority:?} lane is saturated, request dropped")]
  LaneSaturated { priority: Priority },

  /// The cache backend could not persist a fetched value.
  #[error("cache storage error: {0}")]
  Storage(String),

  /// The fetch was aborted before it completed.
  #[error("fetch was cancelled")]
  Cancelled,

  /// Failure reported by a caller-supplied operation.
  #[error("{0}")]
  Other(String),
}

impl FetchError {
  /// Whether this error comes from the network rather than from local
  /// decoding or bookkeeping.
  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport { .. } | Self::Status { .. })
  }

  pub(crate) fn storage(err: color_eyre::Report) -> Self {
    Self::Storage(format!("{:#}", err))
  }
}
