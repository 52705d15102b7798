//! Engine tuning knobs.

use std::time::Duration;

use serde::Deserialize;

/// Timing for the reconciliation engine. Every field has a default, so an
/// empty `[sync]` table is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Delay between the end of one cycle and the start of the next.
  pub poll_interval_ms:        u64,
  /// Added to a track's remaining time when computing status expiration.
  pub expiration_overhead_ms:  u64,
  /// Source credentials are refreshed when they expire within this window.
  pub token_refresh_lead_secs: i64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms:        10_000,
      expiration_overhead_ms:  120_000,
      token_refresh_lead_secs: 300,
    }
  }
}

impl SyncConfig {
  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }

  pub fn expiration_overhead(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(self.expiration_overhead_ms as i64)
  }

  pub fn token_refresh_lead(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.token_refresh_lead_secs)
  }

  /// A status is rewritten while the same track plays once its remaining
  /// time drops to this many milliseconds.
  pub fn refresh_threshold_ms(&self) -> u64 {
    self.poll_interval_ms.saturating_mul(3).saturating_add(self.expiration_overhead_ms)
  }
}
