//! The `StatusSink` trait: the messaging platform holding presence text.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error codes the sink uses for revoked or unusable credentials.
const INVALID_CREDENTIAL_CODES: &[&str] = &[
  "invalid_auth",
  "token_revoked",
  "account_inactive",
  "invalid_token",
  "not_authed",
];

/// True when a sink error code means the credential is gone for good.
pub fn is_invalid_credential_code(code: &str) -> bool {
  let code = code.to_ascii_lowercase();
  INVALID_CREDENTIAL_CODES.iter().any(|c| code.contains(c))
}

/// A profile status to write. Empty text and emoji with no expiration
/// clears the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
  pub text:       String,
  pub emoji:      String,
  pub expires_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
  pub fn cleared() -> Self {
    Self { text: String::new(), emoji: String::new(), expires_at: None }
  }

  pub fn is_clear(&self) -> bool { self.text.is_empty() && self.emoji.is_empty() }
}

/// Failure of a status-sink call, already classified.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
  #[error("sink credential rejected: {0}")]
  CredentialInvalid(String),

  #[error("sink rate limit reached")]
  RateLimited,

  #[error("sink temporarily unavailable: {0}")]
  Transient(String),

  #[error("sink api error: {0}")]
  Api(String),
}

impl SinkError {
  /// Classify a sink error code.
  pub fn from_code(code: &str) -> Self {
    if is_invalid_credential_code(code) {
      Self::CredentialInvalid(code.to_owned())
    } else if code == "ratelimited" {
      Self::RateLimited
    } else {
      Self::Api(code.to_owned())
    }
  }
}

/// Abstraction over the status sink.
pub trait StatusSink: Send + Sync {
  /// Set (or clear) the profile status for the token's owner.
  fn set_status<'a>(
    &'a self,
    token: &'a str,
    update: &'a StatusUpdate,
  ) -> impl Future<Output = Result<(), SinkError>> + Send + 'a;

  /// Current profile status text of `user_id`; empty when none is set.
  fn get_status_text<'a>(
    &'a self,
    token: &'a str,
    user_id: &'a str,
  ) -> impl Future<Output = Result<String, SinkError>> + Send + 'a;

  /// Send a direct message to `channel` (a user id opens a DM).
  fn post_message<'a>(
    &'a self,
    token: &'a str,
    channel: &'a str,
    text: &'a str,
  ) -> impl Future<Output = Result<(), SinkError>> + Send + 'a;
}
