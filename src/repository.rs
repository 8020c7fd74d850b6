//! Cached conference repository: the entry point for UI code.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::api::{Cacheable, ConferenceApi, ConferenceDto, HttpConferenceApi};
use crate::cache::{CacheAsideStore, CacheResult, CacheStorage, SqliteStorage};
use crate::clock::SystemClock;
use crate::config::{Config, ConferencesConfig};
use crate::connectivity::Connectivity;
use crate::dispatch::{Priority, RequestDispatcher};
use crate::error::FetchError;

/// Cache key of the conference list.
pub const CONFERENCES_KEY: &str = "conferences";

/// Conference lookups with transparent caching, retry and prioritisation.
///
/// `Ok(None)` from any lookup means the data is unavailable: nothing is
/// cached and the network is unreachable.
pub struct ConferenceRepository<A, S> {
  cache: CacheAsideStore<S>,
  dispatcher: RequestDispatcher<A>,
  settings: ConferencesConfig,
  /// Shared by every prefetch so bursts queue here instead of being
  /// dropped by the speculative lane.
  prefetch_slots: Arc<Semaphore>,
}

impl ConferenceRepository<HttpConferenceApi, SqliteStorage> {
  /// Build a repository talking HTTP and caching in SQLite, as configured.
  pub fn from_config(config: &Config, connectivity: Arc<dyn Connectivity>) -> Result<Self> {
    let storage = match &config.cache.path {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    };
    let cache = CacheAsideStore::new(storage, Arc::new(SystemClock));

    let base_url = config.api.base_url.clone();
    let dispatcher = RequestDispatcher::new(&config.lanes, connectivity, |priority, lane| {
      HttpConferenceApi::new(&base_url, lane.timeout_secs.map(Duration::from_secs), priority)
    })?;

    Ok(Self::new(cache, dispatcher, config.conferences.clone()))
  }
}

impl<A, S> ConferenceRepository<A, S>
where
  A: ConferenceApi + 'static,
  S: CacheStorage,
{
  pub fn new(cache: CacheAsideStore<S>, dispatcher: RequestDispatcher<A>, settings: ConferencesConfig) -> Self {
    let prefetch_slots = Arc::new(Semaphore::new(dispatcher.lane(Priority::Speculative).capacity()));
    Self {
      cache,
      dispatcher,
      settings,
      prefetch_slots,
    }
  }

  pub fn cache(&self) -> &CacheAsideStore<S> {
    &self.cache
  }

  pub fn dispatcher(&self) -> &RequestDispatcher<A> {
    &self.dispatcher
  }

  /// All conferences, on the configured list lane.
  pub async fn list_conferences(&self) -> Result<Option<Vec<ConferenceDto>>, FetchError> {
    self.list_conferences_with(self.settings.list_priority).await
  }

  /// All conferences, fetched on the lane for `priority` when needed.
  pub async fn list_conferences_with(&self, priority: Priority) -> Result<Option<Vec<ConferenceDto>>, FetchError> {
    let result = self.lookup_conferences(priority).await?;
    let conferences = result.map(CacheResult::into_data);

    if self.settings.prefetch {
      if let Some(list) = &conferences {
        self.prefetch(list);
      }
    }
    Ok(conferences)
  }

  /// The conference list with cache metadata, without prefetching.
  pub async fn lookup_conferences(&self, priority: Priority) -> Result<Option<CacheResult<Vec<ConferenceDto>>>, FetchError> {
    let dispatcher = self.dispatcher.clone();
    self
      .cache
      .get_or_fetch_at(CONFERENCES_KEY, self.settings.list_ttl(), priority, move || async move {
        dispatcher
          .dispatch(priority, |api| async move { api.fetch_conferences().await })
          .await
      })
      .await
  }

  /// A single conference, fetched on the user-initiated lane when needed.
  pub async fn get_conference(&self, slug: &str) -> Result<Option<ConferenceDto>, FetchError> {
    self.get_conference_with(Priority::UserInitiated, slug).await
  }

  /// A single conference, fetched on the lane for `priority` when needed.
  pub async fn get_conference_with(&self, priority: Priority, slug: &str) -> Result<Option<ConferenceDto>, FetchError> {
    Ok(self.lookup_conference(priority, slug).await?.map(CacheResult::into_data))
  }

  /// A single conference with cache metadata.
  pub async fn lookup_conference(
    &self,
    priority: Priority,
    slug: &str,
  ) -> Result<Option<CacheResult<ConferenceDto>>, FetchError> {
    let dispatcher = self.dispatcher.clone();
    let owned_slug = slug.to_string();
    self
      .cache
      .get_or_fetch_at(slug, self.settings.detail_ttl(), priority, move || async move {
        dispatcher
          .dispatch(priority, |api| {
            let slug = owned_slug.clone();
            async move { api.fetch_conference(&slug).await }
          })
          .await
      })
      .await
  }

  /// Warm the per-conference cache for every item in `conferences` on the
  /// speculative lane. Fire-and-forget; failures are only logged.
  ///
  /// At most as many prefetches run at once as the speculative lane has
  /// slots; the rest wait their turn.
  pub fn prefetch(&self, conferences: &[ConferenceDto]) {
    for conference in conferences {
      let slug = conference.cache_key();
      if slug.is_empty() {
        continue;
      }
      let repository = self.clone();
      tokio::spawn(async move {
        let Ok(_slot) = Arc::clone(&repository.prefetch_slots).acquire_owned().await else {
          return;
        };
        if let Err(e) = repository.get_conference_with(Priority::Speculative, &slug).await {
          debug!(slug, error = %e, "prefetch failed");
        }
      });
    }
  }

  /// Abandon all in-flight fetches. Nothing partial is written.
  pub fn shutdown(&self) {
    self.cache.shutdown();
  }
}

impl<A, S> Clone for ConferenceRepository<A, S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      dispatcher: self.dispatcher.clone(),
      settings: self.settings.clone(),
      prefetch_slots: Arc::clone(&self.prefetch_slots),
    }
  }
}
