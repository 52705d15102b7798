//! Admin API handlers.
//!
//! Every route except `/health` requires HTTP Basic auth. Subjects are
//! addressed by their sink user id.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use cadence_core::{
  playback::Device,
  policy::{WorkingHours, format_minute},
  sink::StatusSink,
  source::{PlaybackSource, TokenGrant},
  store::{PolicyStore, SubjectStore},
  subject::{NowPlaying, Subject, SyncState},
};
use cadence_sync::{Enrollment, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::Error};

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
  pub sink_user_id:   String,
  pub sink_team_id:   Option<String>,
  pub sink_token:     String,
  pub sink_bot_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkSourceRequest {
  pub source_user_id:  String,
  pub access_token:    String,
  pub refresh_token:   Option<String>,
  pub expires_in_secs: i64,
}

/// A subject as shown over the API. Credentials never leave the store.
#[derive(Debug, Serialize)]
pub struct SubjectView {
  pub subject_id:       Uuid,
  pub sink_user_id:     String,
  pub sink_team_id:     Option<String>,
  pub source_user_id:   Option<String>,
  pub source_linked:    bool,
  pub now_playing:      Option<NowPlaying>,
  pub last_synced_at:   Option<DateTime<Utc>>,
  pub last_status_text: Option<String>,
  pub sync_state:       SyncState,
  pub status_cleared:   bool,
  pub active:           bool,
}

impl From<Subject> for SubjectView {
  fn from(s: Subject) -> Self {
    Self {
      subject_id:       s.subject_id,
      sink_user_id:     s.sink_user_id,
      sink_team_id:     s.sink_team_id,
      source_user_id:   s.source_user_id,
      source_linked:    s.source.is_some(),
      now_playing:      s.now_playing,
      last_synced_at:   s.last_synced_at,
      last_status_text: s.last_status_text,
      sync_state:       s.sync_state,
      status_cleared:   s.status_cleared,
      active:           s.active,
    }
  }
}

/// Local `HH:MM` bounds and the offset they are relative to.
#[derive(Debug, Deserialize)]
pub struct WorkingHoursRequest {
  pub start:             String,
  pub end:               String,
  pub tz_offset_seconds: i32,
}

/// Working hours as the subject sees them. Without a known offset the
/// bounds are shown in UTC.
#[derive(Debug, Serialize)]
pub struct WorkingHoursView {
  pub enabled:           bool,
  pub start:             Option<String>,
  pub end:               Option<String>,
  pub tz_offset_seconds: Option<i32>,
}

impl From<WorkingHours> for WorkingHoursView {
  fn from(h: WorkingHours) -> Self {
    let (start, end) = match h.local_bounds() {
      Some((start, end)) => (Some(start), Some(end)),
      None => (h.start_minute.map(format_minute), h.end_minute.map(format_minute)),
    };
    Self { enabled: h.enabled, start, end, tz_offset_seconds: h.tz_offset_seconds }
  }
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
  pub cleared: bool,
}

// ─── Handlers ────────────────────────────────────────────────────────────────

pub async fn health() -> &'static str { "ok" }

pub async fn enroll<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Json(req): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<SubjectView>), Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  if req.sink_user_id.trim().is_empty() || req.sink_token.is_empty() {
    return Err(Error::BadRequest("sink_user_id and sink_token are required".into()));
  }
  let subject = state
    .accounts
    .enroll(Enrollment {
      sink_user_id:   req.sink_user_id,
      sink_team_id:   req.sink_team_id,
      sink_token:     req.sink_token,
      sink_bot_token: req.sink_bot_token,
    })
    .await?;
  Ok((StatusCode::CREATED, Json(subject.into())))
}

pub async fn show<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<SubjectView>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  Ok(Json(subject.into()))
}

pub async fn remove<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<StatusCode, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  if state.accounts.remove(&sink_user_id).await? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(Error::NotFound(format!("no subject for sink user {sink_user_id}")))
  }
}

pub async fn link_source<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
  Json(req): Json<LinkSourceRequest>,
) -> Result<Json<SubjectView>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  if req.expires_in_secs <= 0 {
    return Err(Error::BadRequest("expires_in_secs must be positive".into()));
  }
  let grant = TokenGrant {
    access_token:  req.access_token,
    refresh_token: req.refresh_token,
    expires_in:    chrono::Duration::seconds(req.expires_in_secs),
  };
  let subject = state.accounts.link_source(&sink_user_id, req.source_user_id, grant).await?;
  Ok(Json(subject.into()))
}

pub async fn sync_now<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<Outcome>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  Ok(Json(state.engine.sync_now(&sink_user_id).await?))
}

pub async fn start<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<StatusCode, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  state.engine.start_sync(subject.subject_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

pub async fn stop<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<StopResponse>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  let cleared = state.engine.stop_sync(subject.subject_id).await?;
  Ok(Json(StopResponse { cleared }))
}

pub async fn pause<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<StatusCode, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  state.engine.reader().pause(&subject).await?;
  Ok(StatusCode::NO_CONTENT)
}

pub async fn resume<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<StatusCode, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  state.engine.reader().resume(&subject).await?;
  Ok(StatusCode::NO_CONTENT)
}

pub async fn devices<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<Vec<Device>>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let subject = state.engine.subject_by_sink_user(&sink_user_id).await?;
  Ok(Json(state.engine.reader().devices(&subject).await?))
}

pub async fn working_hours<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<WorkingHoursView>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  Ok(Json(state.accounts.working_hours(&sink_user_id).await?.into()))
}

pub async fn set_working_hours<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
  Json(req): Json<WorkingHoursRequest>,
) -> Result<Json<WorkingHoursView>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let hours = WorkingHours::from_local(&req.start, &req.end, req.tz_offset_seconds)
    .map_err(|e| Error::BadRequest(e.to_string()))?;
  Ok(Json(state.accounts.set_working_hours(&sink_user_id, hours).await?.into()))
}

/// Turn working hours off, keeping the configured bounds.
pub async fn clear_working_hours<S, P, K>(
  _: Authenticated,
  State(state): State<AppState<S, P, K>>,
  Path(sink_user_id): Path<String>,
) -> Result<Json<WorkingHoursView>, Error>
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  let hours = WorkingHours { enabled: false, ..state.accounts.working_hours(&sink_user_id).await? };
  Ok(Json(state.accounts.set_working_hours(&sink_user_id, hours).await?.into()))
}
