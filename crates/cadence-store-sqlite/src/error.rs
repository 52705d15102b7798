//! Error type for `cadence-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] cadence_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("subject not found: {0}")]
  SubjectNotFound(uuid::Uuid),

  #[error("sync policy not found for subject {0}")]
  PolicyNotFound(uuid::Uuid),

  #[error("sink user {0:?} is already enrolled")]
  DuplicateSinkUser(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
