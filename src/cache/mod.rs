//! Generic caching layer for data persistence and offline support.
//!
//! This module provides an API-agnostic cache-aside store that:
//! - Serves cached values immediately, keyed by resource
//! - Refreshes values older than a per-call TTL in the background
//! - Shares one in-flight fetch between concurrent readers of a key
//! - Persists entries in SQLite so they survive restarts

mod storage;
mod store;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::{CacheAsideStore, Refresh};
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheValue, StalenessPolicy};
