//! A subject is one enrolled person whose playback is mirrored to a status.
//!
//! A subject carries identity on both sides, sealed credentials, the last
//! observed track and the small state machine the engine drives
//! ([`SyncState`] plus the `status_cleared` flag).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Credentials ─────────────────────────────────────────────────────────────

/// An encrypted credential as stored at rest.
///
/// The inner string is vault ciphertext. It is only opened at the point of
/// use and never logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sealed(pub String);

impl Sealed {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Debug for Sealed {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Sealed([REDACTED])")
  }
}

/// Playback-source credential pair plus its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCredentials {
  pub access_token:  Sealed,
  pub refresh_token: Sealed,
  /// `None` means the expiry is unknown, which is treated as expired.
  pub expires_at:    Option<DateTime<Utc>>,
}

impl SourceCredentials {
  /// True when the access token expires within `lead` of `now`.
  pub fn expires_within(&self, now: DateTime<Utc>, lead: chrono::Duration) -> bool {
    match self.expires_at {
      Some(at) => now + lead >= at,
      None     => true,
    }
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// The track this system last mirrored for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
  pub track_id:  String,
  pub title:     String,
  pub performer: String,
}

/// Who currently owns the subject's sink status.
///
/// `ManualOverride` and `status_cleared == true` are mutually exclusive: an
/// override means a human wrote something, a clear means nobody did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
  /// The engine owns the status.
  #[default]
  Active,
  /// A human changed the status out-of-band; writes are paused until an
  /// explicit resume.
  ManualOverride,
  /// The source or sink rejected a credential as revoked. Terminal until
  /// the subject re-authenticates.
  Invalidated { at: DateTime<Utc> },
}

impl SyncState {
  pub fn is_invalidated(&self) -> bool { matches!(self, Self::Invalidated { .. }) }

  pub fn is_manual_override(&self) -> bool { matches!(self, Self::ManualOverride) }
}

// ─── Subject ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:       Uuid,
  /// Identity in the status sink (e.g. a Slack user id). Unique.
  pub sink_user_id:     String,
  pub sink_team_id:     Option<String>,
  /// Identity in the playback source; `None` until first linked.
  pub source_user_id:   Option<String>,
  /// User token used for profile status reads and writes.
  pub sink_token:       Sealed,
  /// Bot token used for direct messages.
  pub sink_bot_token:   Option<Sealed>,
  pub source:           Option<SourceCredentials>,
  pub now_playing:      Option<NowPlaying>,
  pub last_synced_at:   Option<DateTime<Utc>>,
  /// Text this system last wrote to the sink. `None` or blank means nothing
  /// has been written, or it was cleared.
  pub last_status_text: Option<String>,
  pub sync_state:       SyncState,
  pub status_cleared:   bool,
  /// Whether the subject participates in scheduled cycles.
  pub active:           bool,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

/// Input for [`SubjectStore::add_subject`](crate::store::SubjectStore::add_subject).
#[derive(Debug, Clone)]
pub struct NewSubject {
  pub sink_user_id:   String,
  pub sink_team_id:   Option<String>,
  pub sink_token:     Sealed,
  pub sink_bot_token: Option<Sealed>,
}
