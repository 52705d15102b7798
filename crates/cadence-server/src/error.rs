//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use cadence_sync::{PlaybackError, SyncError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  #[error("not found: {0}")]
  NotFound(String),
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error("conflict: {0}")]
  Conflict(String),
  #[error(transparent)]
  Playback(#[from] PlaybackError),
  #[error(transparent)]
  Sync(SyncError),
}

impl From<SyncError> for Error {
  fn from(e: SyncError) -> Self {
    use cadence_core::Error as Core;
    match e {
      SyncError::Core(
        ref c @ (Core::SubjectNotFound(_) | Core::SinkUserNotFound(_) | Core::PolicyNotFound(_)),
      ) => Self::NotFound(c.to_string()),
      SyncError::Core(c) => Self::BadRequest(c.to_string()),
      SyncError::MissingRefreshToken => Self::BadRequest(e.to_string()),
      SyncError::Busy(_) => Self::Conflict(e.to_string()),
      other => Self::Sync(other),
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res = (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"cadence\""),
        );
        res
      }
      Error::NotFound(msg) => (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response(),
      Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
      Error::Conflict(msg) => (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response(),
      Error::Playback(e) => {
        let status = match e {
          PlaybackError::NotConnected
          | PlaybackError::TokenExpired
          | PlaybackError::NoActiveDevice => StatusCode::CONFLICT,
          PlaybackError::PremiumRequired => StatusCode::FORBIDDEN,
          PlaybackError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
          PlaybackError::Network | PlaybackError::Other(_) => StatusCode::BAD_GATEWAY,
        };
        let body = json!({ "error": e.to_string(), "message": e.user_message() });
        (status, Json(body)).into_response()
      }
      Error::Sync(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
      }
    }
  }
}
