//! Playback snapshots and devices reported by the playback source.

use serde::{Deserialize, Serialize};

/// What kind of item is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  /// Music.
  #[default]
  Track,
  /// Spoken word (podcast episode).
  Episode,
}

/// A playback device known to the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
  /// Some sources omit the id for restricted devices.
  pub id:        Option<String>,
  pub name:      String,
  /// E.g. "Computer", "Smartphone", "Speaker".
  pub kind:      String,
  pub is_active: bool,
}

/// One point-in-time read of the source's playback state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
  pub track_id:     String,
  pub title:        String,
  pub performer:    String,
  pub is_playing:   bool,
  pub duration_ms:  Option<u64>,
  pub progress_ms:  Option<u64>,
  pub device:       Option<Device>,
  pub content_type: ContentType,
}

impl PlaybackSnapshot {
  /// Milliseconds left in the item, when both duration and progress are
  /// known. Saturates at zero.
  pub fn remaining_ms(&self) -> Option<u64> {
    match (self.duration_ms, self.progress_ms) {
      (Some(d), Some(p)) => Some(d.saturating_sub(p)),
      _                  => None,
    }
  }

  pub fn device_id(&self) -> Option<&str> {
    self.device.as_ref().and_then(|d| d.id.as_deref())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn snapshot(duration_ms: Option<u64>, progress_ms: Option<u64>) -> PlaybackSnapshot {
    PlaybackSnapshot {
      track_id: "t1".into(),
      title: "Song".into(),
      performer: "Band".into(),
      is_playing: true,
      duration_ms,
      progress_ms,
      device: None,
      content_type: ContentType::Track,
    }
  }

  #[test]
  fn remaining_is_duration_minus_progress() {
    assert_eq!(snapshot(Some(180_000), Some(175_000)).remaining_ms(), Some(5_000));
  }

  #[test]
  fn remaining_saturates() {
    assert_eq!(snapshot(Some(1_000), Some(2_000)).remaining_ms(), Some(0));
  }

  #[test]
  fn remaining_unknown_without_both_values() {
    assert_eq!(snapshot(None, Some(1_000)).remaining_ms(), None);
    assert_eq!(snapshot(Some(1_000), None).remaining_ms(), None);
  }

  #[test]
  fn device_id_reads_through_device() {
    let mut s = snapshot(None, None);
    assert_eq!(s.device_id(), None);
    s.device = Some(Device {
      id:        Some("D1".into()),
      name:      "Laptop".into(),
      kind:      "Computer".into(),
      is_active: true,
    });
    assert_eq!(s.device_id(), Some("D1"));
  }
}
