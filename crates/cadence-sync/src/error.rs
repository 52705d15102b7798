//! Error type for `cadence-sync`.

use cadence_core::{sink::SinkError, source::SourceError};
use thiserror::Error;
use uuid::Uuid;

use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Core(#[from] cadence_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("vault error: {0}")]
  Vault(#[from] VaultError),

  #[error("sink error: {0}")]
  Sink(#[from] SinkError),

  #[error("source error: {0}")]
  Source(#[from] SourceError),

  #[error("subject {0} has no source credentials")]
  NotConnected(Uuid),

  #[error("subject {0} is being synced")]
  Busy(Uuid),

  #[error("token grant for a new link carries no refresh token")]
  MissingRefreshToken,
}

impl SyncError {
  /// Box a backend store error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
