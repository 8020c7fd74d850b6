//! Remote conference API: wire types and transport.

mod client;
mod types;

pub use client::{ConferenceApi, HttpConferenceApi, DEFAULT_BASE_URL};
pub use types::{Address, Cacheable, ConferenceDto, SessionDto, SpeakerDto};
