//! Polled UI state for repository lookups.
//!
//! A `Query<T>` wraps one repository call. The UI starts it with
//! [`Query::fetch`], calls [`Query::poll`] on each tick and renders from
//! [`Query::state`]. Lookups that come back `Ok(None)` land in
//! [`QueryState::Unavailable`] so the view can show an offline notice
//! instead of an error.
//!
//! ```ignore
//! let repo = repository.clone();
//! let mut conferences = Query::new(move || {
//!   let repo = repo.clone();
//!   async move { repo.list_conferences().await }
//! });
//! conferences.fetch();
//!
//! // event loop tick
//! if conferences.poll() {
//!   redraw();
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Not started
  Idle,
  Loading,
  Success(T),
  /// Nothing cached and the network is unreachable
  Unavailable,
  /// The lookup failed; holds the rendered error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_unavailable(&self) -> bool {
    matches!(self, QueryState::Unavailable)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

impl<T> From<Result<Option<T>, FetchError>> for QueryState<T> {
  fn from(result: Result<Option<T>, FetchError>) -> Self {
    match result {
      Ok(Some(data)) => QueryState::Success(data),
      Ok(None) => QueryState::Unavailable,
      Err(e) => QueryState::Error(e.to_string()),
    }
  }
}

type Outcome<T> = Result<Option<T>, FetchError>;
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Outcome<T>> + Send + Sync>;

/// One repository lookup and its latest result.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Outcome<T>>>,
  settled_at: Option<Instant>,
}

impl<T: Send + 'static> Query<T> {
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || fetcher().boxed()),
      receiver: None,
      settled_at: None,
    }
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_unavailable(&self) -> bool {
    self.state.is_unavailable()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// When the last lookup finished, whatever its outcome.
  pub fn settled_at(&self) -> Option<Instant> {
    self.settled_at
  }

  /// Start the lookup unless one is already running.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Start a new lookup, discarding the result of any pending one.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Pick up a finished lookup. Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let next = match receiver.try_recv() {
      Ok(outcome) => QueryState::from(outcome),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => QueryState::Error(FetchError::Cancelled.to_string()),
    };
    self.state = next;
    self.settled_at = Some(Instant::now());
    self.receiver = None;
    true
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      if tx.send(future.await).is_err() {
        debug!("query result discarded");
      }
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("settled_at", &self.settled_at)
      .finish_non_exhaustive()
  }
}
