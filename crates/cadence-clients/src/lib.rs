//! HTTP adapters for Cadence: the Spotify Web API as a
//! [`PlaybackSource`](cadence_core::source::PlaybackSource) and Slack's Web
//! API as a [`StatusSink`](cadence_core::sink::StatusSink).
//!
//! Both clients share one pooled [`reqwest::Client`] and take credentials
//! per call. Transient failures are retried by [`RetryPolicy`].

pub mod error;
pub mod retry;
pub mod slack;
pub mod spotify;

use std::time::Duration;

pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use slack::{SlackClient, SlackConfig};
pub use spotify::{SpotifyClient, SpotifyConfig};

/// Build the shared HTTP client.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
  let client = reqwest::Client::builder()
    .timeout(timeout)
    .connect_timeout(Duration::from_secs(10))
    .user_agent(concat!("cadence/", env!("CARGO_PKG_VERSION")))
    .build()?;
  Ok(client)
}
