use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::ConferenceDto;
use crate::dispatch::Priority;
use crate::error::FetchError;

/// Default public endpoint of the conference API.
pub const DEFAULT_BASE_URL: &str = "http://api.tekconf.com/v1";

/// Typed access to the remote conference API.
#[async_trait]
pub trait ConferenceApi: Send + Sync {
  /// `GET /conferences`
  async fn fetch_conferences(&self) -> Result<Vec<ConferenceDto>, FetchError>;

  /// `GET /conferences/{slug}`
  async fn fetch_conference(&self, slug: &str) -> Result<ConferenceDto, FetchError>;
}

/// Conference API client over HTTP
#[derive(Clone)]
pub struct HttpConferenceApi {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpConferenceApi {
  pub fn new(base_url: &str, timeout: Option<Duration>, priority: Priority) -> Result<Self> {
    let base_url = Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API base URL '{}' cannot be used as a base", base_url));
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut builder = reqwest::Client::builder()
      .default_headers(headers)
      .user_agent(format!(
        "{}/{} ({:?})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        priority
      ));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Append path segments to the base URL, escaping each one.
  fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| FetchError::Other(format!("{} cannot be a base URL", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
    debug!(%url, "GET");
    let transport = |e: reqwest::Error| FetchError::Transport {
      url: url.to_string(),
      source: Arc::new(e),
    };

    let response = self.client.get(url.clone()).send().await.map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
      url: url.to_string(),
      message: e.to_string(),
    })
  }
}

#[async_trait]
impl ConferenceApi for HttpConferenceApi {
  async fn fetch_conferences(&self) -> Result<Vec<ConferenceDto>, FetchError> {
    let url = self.endpoint(&["conferences"])?;
    self.get_json(url).await
  }

  async fn fetch_conference(&self, slug: &str) -> Result<ConferenceDto, FetchError> {
    let url = self.endpoint(&["conferences", slug])?;
    self.get_json(url).await
  }
}
