//! Playback Reader: refreshes source credentials when they are about to
//! expire, queries playback and classifies what went wrong.

use std::sync::Arc;

use cadence_core::{
  playback::{Device, PlaybackSnapshot},
  source::{PlaybackSource, SourceError},
  store::SubjectStore,
  subject::{SourceCredentials, Subject},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  clock::Clock,
  error::{Result, SyncError},
  vault::{Vault, VaultError},
};

/// Result of reading a subject's playback during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
  /// `None` when nothing is playing.
  Snapshot(Option<PlaybackSnapshot>),
  /// The source rejected the credential; the subject must be invalidated.
  Unauthorized(String),
  /// Rate-limited or temporarily unreachable; try again next cycle.
  Unavailable(String),
}

/// Failure of an on-demand playback command, phrased for the person who
/// asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackError {
  #[error("source account not connected")]
  NotConnected,
  #[error("source credential expired")]
  TokenExpired,
  #[error("no active playback device")]
  NoActiveDevice,
  #[error("premium subscription required")]
  PremiumRequired,
  #[error("rate limited")]
  RateLimited,
  #[error("network error")]
  Network,
  #[error("{0}")]
  Other(String),
}

impl PlaybackError {
  pub fn user_message(&self) -> &'static str {
    match self {
      Self::NotConnected => {
        ":link: *Spotify not connected*\n\nConnect your Spotify account to control playback."
      }
      Self::TokenExpired => {
        ":key: *Your Spotify connection expired*\n\nReconnect your Spotify account to continue."
      }
      Self::NoActiveDevice => {
        ":headphones: *No Spotify device found*\n\nOpen Spotify on your phone, computer or web player, then try again."
      }
      Self::PremiumRequired => {
        ":sparkles: *Spotify Premium required*\n\nPlayback controls are only available for Premium accounts."
      }
      Self::RateLimited => ":hourglass: *Too many requests*\n\nWait a moment before trying again.",
      Self::Network => {
        ":warning: *Couldn't reach Spotify*\n\nThere may be a temporary issue. Try again in a moment."
      }
      Self::Other(_) => ":x: *Something went wrong*\n\nWe couldn't complete your request. Try again.",
    }
  }
}

impl From<SourceError> for PlaybackError {
  fn from(e: SourceError) -> Self {
    match e {
      SourceError::Unauthorized(_) => Self::TokenExpired,
      SourceError::NoActiveDevice => Self::NoActiveDevice,
      SourceError::PremiumRequired => Self::PremiumRequired,
      SourceError::RateLimited => Self::RateLimited,
      SourceError::Transient(_) => Self::Network,
      SourceError::Api(m) => Self::Other(m),
    }
  }
}

enum TokenError {
  NotConnected,
  Source(SourceError),
  Sync(SyncError),
}

impl From<SyncError> for TokenError {
  fn from(e: SyncError) -> Self { Self::Sync(e) }
}

impl From<VaultError> for TokenError {
  fn from(e: VaultError) -> Self { Self::Sync(e.into()) }
}

pub struct PlaybackReader<S, P> {
  store:        Arc<S>,
  source:       Arc<P>,
  vault:        Arc<Vault>,
  clock:        Arc<dyn Clock>,
  refresh_lead: chrono::Duration,
}

impl<S, P> PlaybackReader<S, P>
where
  S: SubjectStore,
  P: PlaybackSource,
{
  pub fn new(
    store: Arc<S>,
    source: Arc<P>,
    vault: Arc<Vault>,
    clock: Arc<dyn Clock>,
    refresh_lead: chrono::Duration,
  ) -> Self {
    Self { store, source, vault, clock, refresh_lead }
  }

  /// What the subject is playing right now.
  pub async fn current_snapshot(&self, subject: &Subject) -> Result<ReadOutcome> {
    let token = match self.access_token(subject).await {
      Ok(t) => t,
      Err(TokenError::NotConnected) => return Err(SyncError::NotConnected(subject.subject_id)),
      Err(TokenError::Source(e)) => return classify_read(subject, e),
      Err(TokenError::Sync(e)) => return Err(e),
    };

    match self.source.current_playback(&token).await {
      Ok(snapshot) => Ok(ReadOutcome::Snapshot(snapshot)),
      Err(e) => classify_read(subject, e),
    }
  }

  pub async fn pause(&self, subject: &Subject) -> Result<(), PlaybackError> {
    let token = self.command_token(subject).await?;
    self.source.pause(&token).await?;
    info!(subject_id = %subject.subject_id, "paused playback");
    Ok(())
  }

  pub async fn resume(&self, subject: &Subject) -> Result<(), PlaybackError> {
    let token = self.command_token(subject).await?;
    self.source.resume(&token).await?;
    info!(subject_id = %subject.subject_id, "resumed playback");
    Ok(())
  }

  pub async fn devices(&self, subject: &Subject) -> Result<Vec<Device>, PlaybackError> {
    let token = self.command_token(subject).await?;
    Ok(self.source.devices(&token).await?)
  }

  async fn command_token(&self, subject: &Subject) -> Result<String, PlaybackError> {
    match self.access_token(subject).await {
      Ok(t) => Ok(t),
      Err(TokenError::NotConnected) => Err(PlaybackError::NotConnected),
      Err(TokenError::Source(e)) => Err(e.into()),
      Err(TokenError::Sync(e)) => {
        warn!(subject_id = %subject.subject_id, error = %e, "could not prepare source credential");
        Err(PlaybackError::Other(e.to_string()))
      }
    }
  }

  /// Plaintext access token, refreshed and persisted first when it expires
  /// within the lead time.
  async fn access_token(&self, subject: &Subject) -> Result<String, TokenError> {
    let creds = subject.source.as_ref().ok_or(TokenError::NotConnected)?;

    if !creds.expires_within(self.clock.now(), self.refresh_lead) {
      return Ok(self.vault.open(&creds.access_token)?);
    }

    debug!(subject_id = %subject.subject_id, "source credential near expiry, refreshing");
    let refresh_token = self.vault.open(&creds.refresh_token)?;
    let grant = self.source.refresh(&refresh_token).await.map_err(TokenError::Source)?;

    let refreshed = SourceCredentials {
      access_token:  self.vault.seal(&grant.access_token)?,
      refresh_token: match &grant.refresh_token {
        Some(rotated) => self.vault.seal(rotated)?,
        None          => creds.refresh_token.clone(),
      },
      expires_at:    Some(self.clock.now() + grant.expires_in),
    };
    self
      .store
      .update_source_credentials(subject.subject_id, None, refreshed)
      .await
      .map_err(SyncError::store)?;

    info!(subject_id = %subject.subject_id, "refreshed source credential");
    Ok(grant.access_token)
  }
}

fn classify_read(subject: &Subject, e: SourceError) -> Result<ReadOutcome> {
  match e {
    SourceError::Unauthorized(reason) => Ok(ReadOutcome::Unauthorized(reason)),
    SourceError::RateLimited | SourceError::Transient(_) => {
      warn!(subject_id = %subject.subject_id, error = %e, "source unavailable");
      Ok(ReadOutcome::Unavailable(e.to_string()))
    }
    SourceError::NoActiveDevice => Ok(ReadOutcome::Snapshot(None)),
    e @ (SourceError::PremiumRequired | SourceError::Api(_)) => Err(e.into()),
  }
}
