//! The `SubjectStore` and `PolicyStore` traits.
//!
//! Both are implemented by storage backends (e.g. `cadence-store-sqlite`).
//! The engine depends on these abstractions, not on any concrete backend.
//!
//! Subject mutations the engine performs are expressed as narrow,
//! single-subject operations rather than read-modify-write of a whole
//! [`Subject`]. A backend must apply each one atomically, which is what lets
//! a manual sync and a scheduled cycle touch the store concurrently.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  policy::{SyncPolicy, WorkingHours},
  subject::{NewSubject, NowPlaying, Sealed, SourceCredentials, Subject},
};

// ─── Subjects ────────────────────────────────────────────────────────────────

/// Abstraction over subject persistence.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait SubjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Create and persist a new, active subject with no source credentials.
  fn add_subject(
    &self,
    input: NewSubject,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_;

  fn get_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  fn find_by_sink_user<'a>(
    &'a self,
    sink_user_id: &'a str,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + 'a;

  /// Every subject with `active == true`.
  fn find_active(&self) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  /// Overwrite a whole subject record. Used by enrollment, not by the
  /// engine.
  fn save_subject<'a>(
    &'a self,
    subject: &'a Subject,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_subject(&self, id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Atomic single-subject updates ─────────────────────────────────────

  /// Replace the sink user token. The bot token and team id are only
  /// replaced when given. Engine-owned fields are left alone.
  fn update_sink_credentials(
    &self,
    id: Uuid,
    sink_token: Sealed,
    sink_bot_token: Option<Sealed>,
    sink_team_id: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Replace the source credential pair and expiry, and the source-side
  /// identity when given.
  fn update_source_credentials(
    &self,
    id: Uuid,
    source_user_id: Option<String>,
    credentials: SourceCredentials,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remember the track just mirrored and stamp `last_synced_at`.
  fn record_now_playing(
    &self,
    id: Uuid,
    track: NowPlaying,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// A status write succeeded: store its text, set `status_cleared =
  /// false` and leave `ManualOverride` if set.
  fn record_status_written(
    &self,
    id: Uuid,
    text: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The status was cleared: forget the observed track and last text and
  /// set `status_cleared = true` (never while in `ManualOverride`).
  fn record_status_cleared(&self, id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Enter `ManualOverride` and set `status_cleared = false`. Has no
  /// effect on an invalidated subject.
  fn mark_manual_override(&self, id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Enter `Invalidated { at }` and deactivate the subject.
  fn mark_invalidated(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Leave `ManualOverride`: adopt `baseline` as the last written text and
  /// forget the observed track. Has no effect in other states.
  fn resume(
    &self,
    id: Uuid,
    baseline: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Leave `Invalidated` after re-authentication and reactivate.
  fn reactivate(&self, id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// Abstraction over sync-policy persistence. One policy per subject.
pub trait PolicyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_policy(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Option<SyncPolicy>, Self::Error>> + Send + '_;

  /// Insert or replace the policy for `policy.subject_id`.
  fn save_policy<'a>(
    &'a self,
    policy: &'a SyncPolicy,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_policy(&self, subject_id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Flip only the running/paused flag.
  fn set_policy_active(
    &self,
    subject_id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Replace only the working-hours window.
  fn set_working_hours(
    &self,
    subject_id: Uuid,
    hours: WorkingHours,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
