//! Priority-tiered request dispatch.
//!
//! Traffic is split into three lanes (`Background`, `UserInitiated`,
//! `Speculative`), each with its own transport client, concurrency ceiling
//! and retry policy. Saturating one lane never holds up another.

mod lane;

use color_eyre::Result;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::connectivity::Connectivity;
use crate::error::FetchError;

pub use lane::{LaneConfig, PriorityLane};

/// Execution class of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
  /// Work the user is not waiting on. Throttled hardest.
  Background,
  /// Work the user is actively waiting on.
  #[default]
  UserInitiated,
  /// Opportunistic prefetching. Dropped under load.
  Speculative,
}

impl Priority {
  pub const ALL: [Priority; 3] = [
    Priority::Background,
    Priority::UserInitiated,
    Priority::Speculative,
  ];

  /// How urgently the caller needs the result. Higher is more urgent.
  pub fn urgency(self) -> u8 {
    match self {
      Priority::Speculative => 0,
      Priority::Background => 1,
      Priority::UserInitiated => 2,
    }
  }

  /// Whether a caller at `waiting` may share a fetch running at `self`
  /// without being slowed down or failed by this lane's policy.
  pub fn serves(self, waiting: Priority) -> bool {
    self.urgency() >= waiting.urgency()
  }
}

/// Lane settings for all three priorities.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LanesConfig {
  pub background: LaneConfig,
  pub user_initiated: LaneConfig,
  pub speculative: LaneConfig,
}

impl LanesConfig {
  pub fn get(&self, priority: Priority) -> &LaneConfig {
    match priority {
      Priority::Background => &self.background,
      Priority::UserInitiated => &self.user_initiated,
      Priority::Speculative => &self.speculative,
    }
  }
}

impl Default for LanesConfig {
  fn default() -> Self {
    Self {
      background: LaneConfig::for_priority(Priority::Background),
      user_initiated: LaneConfig::for_priority(Priority::UserInitiated),
      speculative: LaneConfig::for_priority(Priority::Speculative),
    }
  }
}

struct Lanes<C> {
  background: PriorityLane<C>,
  user_initiated: PriorityLane<C>,
  speculative: PriorityLane<C>,
}

/// Routes operations to the lane for their priority.
pub struct RequestDispatcher<C> {
  lanes: Arc<Lanes<C>>,
  connectivity: Arc<dyn Connectivity>,
}

impl<C> RequestDispatcher<C> {
  /// Build all three lanes up front, asking `factory` for one client per lane.
  pub fn new<F>(config: &LanesConfig, connectivity: Arc<dyn Connectivity>, mut factory: F) -> Result<Self>
  where
    F: FnMut(Priority, &LaneConfig) -> Result<C>,
  {
    let mut build = |priority: Priority| -> Result<PriorityLane<C>> {
      let lane_config = config.get(priority);
      let client = factory(priority, lane_config)?;
      Ok(PriorityLane::new(priority, client, lane_config))
    };

    let lanes = Lanes {
      background: build(Priority::Background)?,
      user_initiated: build(Priority::UserInitiated)?,
      speculative: build(Priority::Speculative)?,
    };
    Ok(Self::from_lanes(lanes, connectivity))
  }

  /// Assemble a dispatcher from lanes built by the caller.
  pub fn with_lanes(
    background: PriorityLane<C>,
    user_initiated: PriorityLane<C>,
    speculative: PriorityLane<C>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self::from_lanes(
      Lanes {
        background,
        user_initiated,
        speculative,
      },
      connectivity,
    )
  }

  fn from_lanes(lanes: Lanes<C>, connectivity: Arc<dyn Connectivity>) -> Self {
    Self {
      lanes: Arc::new(lanes),
      connectivity,
    }
  }

  pub fn lane(&self, priority: Priority) -> &PriorityLane<C> {
    match priority {
      Priority::Background => &self.lanes.background,
      Priority::UserInitiated => &self.lanes.user_initiated,
      Priority::Speculative => &self.lanes.speculative,
    }
  }

  pub fn is_connected(&self) -> bool {
    self.connectivity.is_connected()
  }

  /// Run `operation` on the lane for `priority`.
  ///
  /// Returns `Ok(None)` without touching the network when offline.
  /// Connectivity is checked again before every retry; losing it ends the
  /// retry loop with `Ok(None)`.
  pub async fn dispatch<T, F, Fut>(&self, priority: Priority, mut operation: F) -> Result<Option<T>, FetchError>
  where
    F: FnMut(Arc<C>) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    if !self.connectivity.is_connected() {
      debug!(?priority, "network unreachable, skipping dispatch");
      return Ok(None);
    }

    let connectivity = &self.connectivity;
    self
      .lane(priority)
      .execute(|client| {
        let attempt = connectivity.is_connected().then(|| operation(client));
        async move {
          match attempt {
            Some(attempt) => attempt.await.map(Some),
            None => {
              debug!(?priority, "network lost, abandoning retries");
              Ok(None)
            }
          }
        }
      })
      .await
  }
}

impl<C> Clone for RequestDispatcher<C> {
  fn clone(&self) -> Self {
    Self {
      lanes: Arc::clone(&self.lanes),
      connectivity: Arc::clone(&self.connectivity),
    }
  }
}
