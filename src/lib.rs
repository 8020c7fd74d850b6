//! Offline-tolerant client for the TekConf conference directory.
//!
//! [`ConferenceRepository`] is the entry point. Reads go through a
//! cache-aside store that returns cached data at once, refreshes stale
//! entries in the background and deduplicates concurrent fetches per key.
//! Network calls run on priority lanes with their own concurrency limits and
//! retry policies, and are skipped entirely while the device is offline.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod query;
pub mod repository;
pub mod retry;

#[cfg(test)]
mod testing;

pub use api::{ConferenceApi, ConferenceDto, HttpConferenceApi};
pub use cache::{CacheAsideStore, CacheResult, CacheSource, MemoryStorage, SqliteStorage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityFlag};
pub use dispatch::{Priority, RequestDispatcher};
pub use error::FetchError;
pub use query::{Query, QueryState};
pub use repository::ConferenceRepository;
pub use retry::{Backoff, RetryExecutor, RetryOn, RetryPolicy};
