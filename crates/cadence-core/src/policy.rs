//! Per-subject sync policy.
//!
//! Working hours are stored as UTC minutes-of-day. The subject's timezone
//! offset is kept only to render those bounds back in local time; every
//! comparison happens in UTC.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  playback::ContentType,
};

pub const DEFAULT_EMOJI: &str = ":musical_note:";
pub const DEFAULT_TEMPLATE: &str = "{emoji} {title} - {artist}";

const MINUTES_PER_DAY: i32 = 24 * 60;

// ─── Content filter ──────────────────────────────────────────────────────────

/// Which kinds of playback are mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilter {
  Music,
  SpokenWord,
  #[default]
  Both,
}

impl ContentFilter {
  pub fn admits(self, content: ContentType) -> bool {
    match self {
      Self::Both       => true,
      Self::Music      => content == ContentType::Track,
      Self::SpokenWord => content == ContentType::Episode,
    }
  }
}

// ─── Working hours ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkingHours {
  pub enabled:           bool,
  /// UTC minute of day, `0..1440`.
  pub start_minute:      Option<u16>,
  /// UTC minute of day, `0..1440`.
  pub end_minute:        Option<u16>,
  /// Offset from UTC in seconds; display only.
  pub tz_offset_seconds: Option<i32>,
}

impl WorkingHours {
  /// Build enabled working hours from local `HH:MM` bounds.
  ///
  /// Rejects malformed times and ranges whose UTC bounds coincide.
  pub fn from_local(start: &str, end: &str, tz_offset_seconds: i32) -> Result<Self> {
    let start_minute = local_to_utc_minute(start, tz_offset_seconds)?;
    let end_minute   = local_to_utc_minute(end, tz_offset_seconds)?;
    if start_minute == end_minute {
      return Err(Error::EmptyWorkingHours(format_minute(start_minute)));
    }
    Ok(Self {
      enabled:           true,
      start_minute:      Some(start_minute),
      end_minute:        Some(end_minute),
      tz_offset_seconds: Some(tz_offset_seconds),
    })
  }

  /// Whether sync may run at `now`.
  ///
  /// Disabled or half-configured working hours never block sync.
  pub fn allows(&self, now: DateTime<Utc>) -> bool {
    if !self.enabled {
      return true;
    }
    let (Some(start), Some(end)) = (self.start_minute, self.end_minute) else {
      return true;
    };
    let minute = (now.hour() * 60 + now.minute()) as u16;
    if start < end {
      (start..=end).contains(&minute)
    } else {
      // Wraps past midnight, e.g. 22:00–06:00.
      minute >= start || minute <= end
    }
  }

  /// Render the configured bounds in the subject's local time, if known.
  pub fn local_bounds(&self) -> Option<(String, String)> {
    let offset = self.tz_offset_seconds?;
    let start  = utc_minute_to_local(self.start_minute?, offset);
    let end    = utc_minute_to_local(self.end_minute?, offset);
    Some((format_minute(start), format_minute(end)))
  }
}

/// Convert a local `HH:MM` time to a UTC minute-of-day.
pub fn local_to_utc_minute(local: &str, tz_offset_seconds: i32) -> Result<u16> {
  if tz_offset_seconds.abs() > 18 * 3600 {
    return Err(Error::InvalidOffset(tz_offset_seconds));
  }
  let time = NaiveTime::parse_from_str(local.trim(), "%H:%M")
    .map_err(|_| Error::InvalidTimeOfDay(local.to_owned()))?;
  let local_minute = (time.hour() * 60 + time.minute()) as i32;
  let utc = (local_minute - tz_offset_seconds / 60).rem_euclid(MINUTES_PER_DAY);
  Ok(utc as u16)
}

/// Convert a UTC minute-of-day to the subject's local minute-of-day.
pub fn utc_minute_to_local(utc_minute: u16, tz_offset_seconds: i32) -> u16 {
  (utc_minute as i32 + tz_offset_seconds / 60).rem_euclid(MINUTES_PER_DAY) as u16
}

/// `HH:MM` rendering of a minute-of-day.
pub fn format_minute(minute: u16) -> String {
  format!("{:02}:{:02}", minute / 60, minute % 60)
}

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
  pub subject_id:            Uuid,
  /// The subject wants sync at all.
  pub enabled:               bool,
  /// Sync is currently running rather than paused.
  pub active:                bool,
  pub default_emoji:         String,
  /// One is picked at random per write when non-empty.
  pub rotating_emojis:       Vec<String>,
  pub content_filter:        ContentFilter,
  /// `None` or empty means every device is allowed.
  pub allowed_devices:       Option<Vec<String>>,
  pub working_hours:         WorkingHours,
  pub show_performer:        bool,
  pub show_title:            bool,
  pub template:              String,
  pub notifications_enabled: bool,
  pub updated_at:            DateTime<Utc>,
}

impl SyncPolicy {
  /// The policy created alongside a freshly enrolled subject. Sync is
  /// enabled but paused until the subject starts it.
  pub fn new(subject_id: Uuid) -> Self {
    Self {
      subject_id,
      enabled:               true,
      active:                false,
      default_emoji:         DEFAULT_EMOJI.to_owned(),
      rotating_emojis:       Vec::new(),
      content_filter:        ContentFilter::Both,
      allowed_devices:       None,
      working_hours:         WorkingHours::default(),
      show_performer:        true,
      show_title:            true,
      template:              DEFAULT_TEMPLATE.to_owned(),
      notifications_enabled: false,
      updated_at:            Utc::now(),
    }
  }

  /// True when a device id passes the allow-list.
  ///
  /// An unknown device is always allowed.
  pub fn allows_device(&self, device_id: Option<&str>) -> bool {
    let Some(id) = device_id else { return true };
    match self.allowed_devices.as_deref() {
      None | Some([]) => true,
      Some(list)      => list.iter().any(|d| d == id),
    }
  }
}
