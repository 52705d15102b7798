//! Error types for `cadence-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("subject not found: {0}")]
  SubjectNotFound(Uuid),

  #[error("no subject for sink user {0:?}")]
  SinkUserNotFound(String),

  #[error("sync policy not found for subject {0}")]
  PolicyNotFound(Uuid),

  #[error("invalid time of day {0:?}, expected HH:MM")]
  InvalidTimeOfDay(String),

  #[error("working hours start and end are identical ({0})")]
  EmptyWorkingHours(String),

  #[error("timezone offset out of range: {0}s")]
  InvalidOffset(i32),

  #[error("unknown discriminant {value:?} for {kind}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
