//! The Cadence reconciliation engine.
//!
//! Everything here is written against the traits in `cadence-core`, so the
//! engine runs unchanged against SQLite and the real HTTP clients in
//! production, and against in-memory fakes in tests.
//!
//! | Module        | Role                                                     |
//! |---------------|----------------------------------------------------------|
//! | [`engine`]    | `run_cycle`, `evaluate`, `sync_now`, start / stop        |
//! | [`reader`]    | credential refresh, playback reads, player commands      |
//! | [`writer`]    | status writes and clears, manual-change detection        |
//! | [`accounts`]  | enrollment and source linking                            |
//! | [`scheduler`] | fixed-delay loop                                         |
//! | [`vault`]     | AES-256-GCM sealing of stored credentials                |

pub mod accounts;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod reader;
pub mod report;
pub mod scheduler;
pub mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vault;
pub mod writer;

pub use accounts::{Accounts, Enrollment};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{Result, SyncError};
pub use reader::{PlaybackError, PlaybackReader, ReadOutcome};
pub use report::{CycleReport, Outcome, SkipReason};
pub use vault::{Vault, VaultConfig, VaultError};
pub use writer::{ClearOutcome, Revocation, StatusWriter, WriteOutcome};

#[cfg(test)]
mod tests;
