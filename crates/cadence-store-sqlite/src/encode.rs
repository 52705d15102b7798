//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. String lists are stored as
//! compact JSON. UUIDs are stored as hyphenated lowercase strings. Booleans
//! are 0/1 integers.

use chrono::{DateTime, Utc};
use cadence_core::{
  policy::{ContentFilter, SyncPolicy, WorkingHours},
  subject::{NowPlaying, Sealed, SourceCredentials, Subject, SyncState},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── SyncState ───────────────────────────────────────────────────────────────

/// The `sync_state` discriminant; the invalidation time lives in its own
/// column.
pub fn encode_sync_state(s: SyncState) -> (&'static str, Option<String>) {
  match s {
    SyncState::Active => ("active", None),
    SyncState::ManualOverride => ("manual_override", None),
    SyncState::Invalidated { at } => ("invalidated", Some(encode_dt(at))),
  }
}

pub fn decode_sync_state(s: &str, invalidated_at: Option<String>) -> Result<SyncState> {
  match s {
    "active" => Ok(SyncState::Active),
    "manual_override" => Ok(SyncState::ManualOverride),
    "invalidated" => {
      let at = invalidated_at
        .ok_or_else(|| Error::DateParse("invalidated subject without invalidated_at".into()))?;
      Ok(SyncState::Invalidated { at: decode_dt(&at)? })
    }
    other => Err(unknown("sync_state", other)),
  }
}

// ─── ContentFilter ───────────────────────────────────────────────────────────

pub fn encode_content_filter(f: ContentFilter) -> &'static str {
  match f {
    ContentFilter::Music => "music",
    ContentFilter::SpokenWord => "spoken_word",
    ContentFilter::Both => "both",
  }
}

pub fn decode_content_filter(s: &str) -> Result<ContentFilter> {
  match s {
    "music" => Ok(ContentFilter::Music),
    "spoken_word" => Ok(ContentFilter::SpokenWord),
    "both" => Ok(ContentFilter::Both),
    other => Err(unknown("content_filter", other)),
  }
}

fn unknown(kind: &'static str, value: &str) -> Error {
  Error::Core(cadence_core::Error::UnknownDiscriminant { kind, value: value.to_owned() })
}

// ─── Lists ───────────────────────────────────────────────────────────────────

pub fn encode_list(items: &[String]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_list(s: &str) -> Result<Vec<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching the field order of [`RawSubject`].
pub const SUBJECT_COLUMNS: &str = "subject_id, sink_user_id, sink_team_id, source_user_id,
  sink_token, sink_bot_token, source_access_token, source_refresh_token, source_expires_at,
  track_id, track_title, track_performer, last_synced_at, last_status_text,
  sync_state, invalidated_at, status_cleared, active, created_at, updated_at";

/// Raw values read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:           String,
  pub sink_user_id:         String,
  pub sink_team_id:         Option<String>,
  pub source_user_id:       Option<String>,
  pub sink_token:           String,
  pub sink_bot_token:       Option<String>,
  pub source_access_token:  Option<String>,
  pub source_refresh_token: Option<String>,
  pub source_expires_at:    Option<String>,
  pub track_id:             Option<String>,
  pub track_title:          Option<String>,
  pub track_performer:      Option<String>,
  pub last_synced_at:       Option<String>,
  pub last_status_text:     Option<String>,
  pub sync_state:           String,
  pub invalidated_at:       Option<String>,
  pub status_cleared:       bool,
  pub active:               bool,
  pub created_at:           String,
  pub updated_at:           String,
}

impl RawSubject {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:           row.get(0)?,
      sink_user_id:         row.get(1)?,
      sink_team_id:         row.get(2)?,
      source_user_id:       row.get(3)?,
      sink_token:           row.get(4)?,
      sink_bot_token:       row.get(5)?,
      source_access_token:  row.get(6)?,
      source_refresh_token: row.get(7)?,
      source_expires_at:    row.get(8)?,
      track_id:             row.get(9)?,
      track_title:          row.get(10)?,
      track_performer:      row.get(11)?,
      last_synced_at:       row.get(12)?,
      last_status_text:     row.get(13)?,
      sync_state:           row.get(14)?,
      invalidated_at:       row.get(15)?,
      status_cleared:       row.get(16)?,
      active:               row.get(17)?,
      created_at:           row.get(18)?,
      updated_at:           row.get(19)?,
    })
  }

  pub fn into_subject(self) -> Result<Subject> {
    // A half-written credential pair is treated as no credentials.
    let source = match (self.source_access_token, self.source_refresh_token) {
      (Some(access), Some(refresh)) => Some(SourceCredentials {
        access_token:  Sealed(access),
        refresh_token: Sealed(refresh),
        expires_at:    decode_opt_dt(self.source_expires_at)?,
      }),
      _ => None,
    };

    let now_playing = self.track_id.map(|track_id| NowPlaying {
      track_id,
      title:     self.track_title.unwrap_or_default(),
      performer: self.track_performer.unwrap_or_default(),
    });

    Ok(Subject {
      subject_id:       decode_uuid(&self.subject_id)?,
      sink_user_id:     self.sink_user_id,
      sink_team_id:     self.sink_team_id,
      source_user_id:   self.source_user_id,
      sink_token:       Sealed(self.sink_token),
      sink_bot_token:   self.sink_bot_token.map(Sealed),
      source,
      now_playing,
      last_synced_at:   decode_opt_dt(self.last_synced_at)?,
      last_status_text: self.last_status_text,
      sync_state:       decode_sync_state(&self.sync_state, self.invalidated_at)?,
      status_cleared:   self.status_cleared,
      active:           self.active,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

/// Column list matching the field order of [`RawPolicy`].
pub const POLICY_COLUMNS: &str = "subject_id, enabled, active, default_emoji, rotating_emojis,
  content_filter, allowed_devices, hours_enabled, hours_start_minute, hours_end_minute,
  tz_offset_seconds, show_performer, show_title, template, notifications_enabled, updated_at";

/// Raw values read directly from a `sync_policies` row.
pub struct RawPolicy {
  pub subject_id:            String,
  pub enabled:               bool,
  pub active:                bool,
  pub default_emoji:         String,
  pub rotating_emojis:       String,
  pub content_filter:        String,
  pub allowed_devices:       Option<String>,
  pub hours_enabled:         bool,
  pub hours_start_minute:    Option<u16>,
  pub hours_end_minute:      Option<u16>,
  pub tz_offset_seconds:     Option<i32>,
  pub show_performer:        bool,
  pub show_title:            bool,
  pub template:              String,
  pub notifications_enabled: bool,
  pub updated_at:            String,
}

impl RawPolicy {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:            row.get(0)?,
      enabled:               row.get(1)?,
      active:                row.get(2)?,
      default_emoji:         row.get(3)?,
      rotating_emojis:       row.get(4)?,
      content_filter:        row.get(5)?,
      allowed_devices:       row.get(6)?,
      hours_enabled:         row.get(7)?,
      hours_start_minute:    row.get(8)?,
      hours_end_minute:      row.get(9)?,
      tz_offset_seconds:     row.get(10)?,
      show_performer:        row.get(11)?,
      show_title:            row.get(12)?,
      template:              row.get(13)?,
      notifications_enabled: row.get(14)?,
      updated_at:            row.get(15)?,
    })
  }

  pub fn into_policy(self) -> Result<SyncPolicy> {
    Ok(SyncPolicy {
      subject_id:            decode_uuid(&self.subject_id)?,
      enabled:               self.enabled,
      active:                self.active,
      default_emoji:         self.default_emoji,
      rotating_emojis:       decode_list(&self.rotating_emojis)?,
      content_filter:        decode_content_filter(&self.content_filter)?,
      allowed_devices:       self.allowed_devices.as_deref().map(decode_list).transpose()?,
      working_hours:         WorkingHours {
        enabled:           self.hours_enabled,
        start_minute:      self.hours_start_minute,
        end_minute:        self.hours_end_minute,
        tz_offset_seconds: self.tz_offset_seconds,
      },
      show_performer:        self.show_performer,
      show_title:            self.show_title,
      template:              self.template,
      notifications_enabled: self.notifications_enabled,
      updated_at:            decode_dt(&self.updated_at)?,
    })
  }
}
