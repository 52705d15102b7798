//! The `PlaybackSource` trait: the streaming service's Web API.
//!
//! Implementations take plaintext credentials per call; they never hold a
//! subject's credentials between calls.

use std::future::Future;

use thiserror::Error;

use crate::playback::{Device, PlaybackSnapshot};

/// A freshly issued credential pair.
#[derive(Debug, Clone)]
pub struct TokenGrant {
  pub access_token:  String,
  /// Providers may omit this on refresh, meaning the old one stays valid.
  pub refresh_token: Option<String>,
  pub expires_in:    chrono::Duration,
}

/// Failure of a playback-source call, already classified.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
  /// The credential was rejected as revoked or expired beyond refresh.
  #[error("source credential rejected: {0}")]
  Unauthorized(String),

  #[error("source rate limit reached")]
  RateLimited,

  /// Network failure or temporary unavailability, after retries.
  #[error("source temporarily unavailable: {0}")]
  Transient(String),

  /// A player command found no device to act on.
  #[error("no active playback device")]
  NoActiveDevice,

  /// A player command requires a paid tier.
  #[error("premium subscription required")]
  PremiumRequired,

  #[error("source api error: {0}")]
  Api(String),
}

/// Abstraction over the playback source.
pub trait PlaybackSource: Send + Sync {
  /// What the credential's owner is playing right now. `Ok(None)` when
  /// nothing is active.
  fn current_playback<'a>(
    &'a self,
    access_token: &'a str,
  ) -> impl Future<Output = Result<Option<PlaybackSnapshot>, SourceError>> + Send + 'a;

  /// Exchange a refresh token for a new credential pair.
  fn refresh<'a>(
    &'a self,
    refresh_token: &'a str,
  ) -> impl Future<Output = Result<TokenGrant, SourceError>> + Send + 'a;

  fn devices<'a>(
    &'a self,
    access_token: &'a str,
  ) -> impl Future<Output = Result<Vec<Device>, SourceError>> + Send + 'a;

  fn pause<'a>(
    &'a self,
    access_token: &'a str,
  ) -> impl Future<Output = Result<(), SourceError>> + Send + 'a;

  fn resume<'a>(
    &'a self,
    access_token: &'a str,
  ) -> impl Future<Output = Result<(), SourceError>> + Send + 'a;
}
