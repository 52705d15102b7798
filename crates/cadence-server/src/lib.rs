//! Cadence server: configuration, shared state and the admin HTTP API.
//!
//! The binary in `main.rs` wires the SQLite store and the HTTP clients into
//! an [`Engine`], spawns the scheduler and serves [`router`].

pub mod api;
pub mod auth;
pub mod error;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post, put},
};
use cadence_clients::{RetryPolicy, SlackConfig, SpotifyConfig};
use cadence_core::{
  sink::StatusSink,
  source::PlaybackSource,
  store::{PolicyStore, SubjectStore},
};
use cadence_sync::{Accounts, Engine, SyncConfig, VaultConfig};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` layered with
/// `CADENCE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  pub auth_username:      String,
  pub auth_password_hash: String,
  #[serde(default = "default_http_timeout_secs")]
  pub http_timeout_secs:  u64,
  #[serde(default)]
  pub sync:               SyncConfig,
  #[serde(default)]
  pub retry:              RetryPolicy,
  #[serde(default)]
  pub vault:              VaultConfig,
  #[serde(default)]
  pub spotify:            SpotifyConfig,
  #[serde(default)]
  pub slack:              SlackConfig,
}

fn default_http_timeout_secs() -> u64 { 30 }

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, P, K> {
  pub engine:   Arc<Engine<S, P, K>>,
  pub accounts: Arc<Accounts<S>>,
  pub auth:     Arc<AuthConfig>,
}

impl<S, P, K> Clone for AppState<S, P, K> {
  fn clone(&self) -> Self {
    Self {
      engine:   self.engine.clone(),
      accounts: self.accounts.clone(),
      auth:     self.auth.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<S, P, K>(state: AppState<S, P, K>) -> Router
where
  S: SubjectStore + PolicyStore + 'static,
  P: PlaybackSource + 'static,
  K: StatusSink + 'static,
{
  Router::new()
    .route("/health",                                      get(api::health))
    .route("/api/subjects",                                post(api::enroll::<S, P, K>))
    .route("/api/subjects/{sink_user_id}",                 get(api::show::<S, P, K>).delete(api::remove::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/source",          put(api::link_source::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/sync",            post(api::sync_now::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/start",           post(api::start::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/stop",            post(api::stop::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/playback/pause",  post(api::pause::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/playback/resume", post(api::resume::<S, P, K>))
    .route("/api/subjects/{sink_user_id}/devices",         get(api::devices::<S, P, K>))
    .route(
      "/api/subjects/{sink_user_id}/working-hours",
      get(api::working_hours::<S, P, K>)
        .put(api::set_working_hours::<S, P, K>)
        .delete(api::clear_working_hours::<S, P, K>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
