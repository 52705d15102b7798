//! Per-subject outcomes and the per-cycle tally.

use serde::Serialize;

/// Why an evaluation stopped before touching the source or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  NoSourceCredential,
  Invalidated,
  NoPolicy,
  Disabled,
  Paused,
  OutsideWorkingHours,
  ManualOverride,
  /// Another evaluation of the same subject is in flight.
  Busy,
}

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
  Skipped(SkipReason),
  /// The sink text no longer matches what was written; sync is paused.
  ManualOverrideDetected,
  /// Nothing is playing any more and the status was cleared.
  Cleared,
  /// Nothing playing, nothing to clear.
  Idle,
  /// A new track was written.
  Updated,
  /// The same track was rewritten to push its expiration out.
  Refreshed,
  Unchanged,
  /// A credential was rejected and the subject is now invalidated.
  Invalidated,
  /// The source could not be read this time; nothing changed.
  Unavailable,
}

/// Tally of one `run_cycle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
  pub succeeded: usize,
  pub skipped:   usize,
  pub failed:    usize,
}

impl CycleReport {
  pub fn record(&mut self, outcome: &Outcome) {
    match outcome {
      Outcome::Skipped(_) => self.skipped += 1,
      Outcome::Unavailable => self.failed += 1,
      _ => self.succeeded += 1,
    }
  }

  pub fn total(&self) -> usize { self.succeeded + self.skipped + self.failed }
}
