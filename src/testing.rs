//! Scripted API double shared by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{ConferenceApi, ConferenceDto};
use crate::dispatch::Priority;
use crate::error::FetchError;

#[derive(Default)]
struct Script {
  conferences: Vec<ConferenceDto>,
  list_failures: u32,
  detail_failures: u32,
  detail_latency: Option<Duration>,
  list_calls: u32,
  detail_calls: HashMap<String, u32>,
  lane_calls: HashMap<Priority, u32>,
}

/// Serves a fixed conference list. Clones share call counters; use
/// [`FakeApi::for_lane`] to attribute calls to a priority.
#[derive(Clone)]
pub(crate) struct FakeApi {
  script: Arc<Mutex<Script>>,
  lane: Option<Priority>,
}

impl FakeApi {
  pub(crate) fn new(conferences: Vec<ConferenceDto>) -> Self {
    Self {
      script: Arc::new(Mutex::new(Script {
        conferences,
        ..Script::default()
      })),
      lane: None,
    }
  }

  pub(crate) fn for_lane(&self, priority: Priority) -> Self {
    Self {
      script: Arc::clone(&self.script),
      lane: Some(priority),
    }
  }

  /// Answer the next `count` list calls with a 503.
  pub(crate) fn fail_next_lists(&self, count: u32) {
    self.script.lock().unwrap().list_failures = count;
  }

  /// Answer the next `count` detail calls with a 503.
  pub(crate) fn fail_next_details(&self, count: u32) {
    self.script.lock().unwrap().detail_failures = count;
  }

  /// Make every detail call take `latency` before answering.
  pub(crate) fn with_detail_latency(self, latency: Duration) -> Self {
    self.script.lock().unwrap().detail_latency = Some(latency);
    self
  }

  pub(crate) fn list_calls(&self) -> u32 {
    self.script.lock().unwrap().list_calls
  }

  pub(crate) fn detail_calls(&self, slug: &str) -> u32 {
    self.script.lock().unwrap().detail_calls.get(slug).copied().unwrap_or(0)
  }

  pub(crate) fn calls_on(&self, priority: Priority) -> u32 {
    self.script.lock().unwrap().lane_calls.get(&priority).copied().unwrap_or(0)
  }

  fn record_lane(&self, script: &mut Script) {
    if let Some(lane) = self.lane {
      *script.lane_calls.entry(lane).or_default() += 1;
    }
  }
}

fn unavailable(url: &str) -> FetchError {
  FetchError::Status {
    url: url.to_string(),
    status: 503,
  }
}

#[async_trait]
impl ConferenceApi for FakeApi {
  async fn fetch_conferences(&self) -> Result<Vec<ConferenceDto>, FetchError> {
    let mut script = self.script.lock().unwrap();
    script.list_calls += 1;
    self.record_lane(&mut script);
    if script.list_failures > 0 {
      script.list_failures -= 1;
      return Err(unavailable("fake://conferences"));
    }
    Ok(script.conferences.clone())
  }

  async fn fetch_conference(&self, slug: &str) -> Result<ConferenceDto, FetchError> {
    let (latency, outcome) = {
      let mut script = self.script.lock().unwrap();
      *script.detail_calls.entry(slug.to_string()).or_default() += 1;
      self.record_lane(&mut script);
      let url = format!("fake://conferences/{}", slug);
      let outcome = if script.detail_failures > 0 {
        script.detail_failures -= 1;
        Err(unavailable(&url))
      } else {
        script
          .conferences
          .iter()
          .find(|c| c.slug == slug)
          .cloned()
          .ok_or(FetchError::Status { url, status: 404 })
      };
      (script.detail_latency, outcome)
    };

    if let Some(latency) = latency {
      tokio::time::sleep(latency).await;
    }
    outcome
  }
}
