//! Network reachability oracle consulted before every dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers "is the network reachable right now".
pub trait Connectivity: Send + Sync {
  fn is_connected(&self) -> bool;
}

/// Oracle for hosts without reachability detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
  fn is_connected(&self) -> bool {
    true
  }
}

/// A reachability flag the embedding application flips from its own
/// platform notifications. Clones share state.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
  connected: Arc<AtomicBool>,
}

impl ConnectivityFlag {
  pub fn new(connected: bool) -> Self {
    Self {
      connected: Arc::new(AtomicBool::new(connected)),
    }
  }

  pub fn set_connected(&self, connected: bool) {
    self.connected.store(connected, Ordering::SeqCst);
  }
}

impl Default for ConnectivityFlag {
  fn default() -> Self {
    Self::new(true)
  }
}

impl Connectivity for ConnectivityFlag {
  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }
}

impl<F> Connectivity for F
where
  F: Fn() -> bool + Send + Sync,
{
  fn is_connected(&self) -> bool {
    self()
  }
}
