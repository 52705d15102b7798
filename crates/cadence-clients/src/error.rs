//! Error type for `cadence-clients`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to build http client: {0}")]
  Build(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
