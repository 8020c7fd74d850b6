//! Wire types returned by the conference API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An item with a stable identity, usable as its own cache key.
pub trait Cacheable {
  fn cache_key(&self) -> String;
}

/// Conference summary and detail record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConferenceDto {
  pub name: String,
  pub slug: String,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
  pub description: Option<String>,
  pub image_url: Option<String>,
  pub image_url_square: Option<String>,
  pub is_added_to_schedule: bool,
  pub is_online: Option<bool>,
  pub address: Option<Address>,
  pub position: Vec<f64>,
  pub longitude: f64,
  pub latitude: f64,
  pub sessions: Vec<SessionDto>,
}

impl ConferenceDto {
  /// Square image, falling back to the regular image when unset or blank.
  pub fn square_image(&self) -> Option<&str> {
    match self.image_url_square.as_deref() {
      Some(url) if !url.trim().is_empty() => Some(url),
      _ => self.image_url.as_deref(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
  pub street_number: i32,
  pub street_name: Option<String>,
  pub city: Option<String>,
  pub state: Option<String>,
  pub postal_area: Option<String>,
  pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDto {
  pub slug: String,
  pub title: String,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
  pub room: Option<String>,
  pub difficulty: Option<String>,
  pub description: Option<String>,
  pub twitter_hash_tag: Option<String>,
  pub session_type: Option<String>,
  pub is_added_to_schedule: bool,
  pub speakers: Vec<SpeakerDto>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeakerDto {
  pub slug: String,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub full_name: Option<String>,
  pub description: Option<String>,
  pub email_address: Option<String>,
  pub phone_number: Option<String>,
  pub url: Option<String>,
  pub profile_image_url: Option<String>,
  pub blog_url: Option<String>,
  pub twitter_name: Option<String>,
  pub facebook_url: Option<String>,
  pub linked_in_url: Option<String>,
  pub google_plus_url: Option<String>,
  pub vimeo_url: Option<String>,
  pub youtube_url: Option<String>,
  pub github_url: Option<String>,
  pub coder_wall_url: Option<String>,
  pub stackoverflow_url: Option<String>,
  pub bitbucket_url: Option<String>,
  pub codeplex_url: Option<String>,
}

impl Cacheable for ConferenceDto {
  fn cache_key(&self) -> String {
    self.slug.clone()
  }
}

impl Cacheable for SessionDto {
  fn cache_key(&self) -> String {
    self.slug.clone()
  }
}

impl Cacheable for SpeakerDto {
  fn cache_key(&self) -> String {
    self.slug.clone()
  }
}
