//! Bounded exponential backoff around a single HTTP request.
//!
//! Retries on network errors, HTTP 429 and HTTP 5xx. Anything else is
//! returned to the caller on the first attempt. When attempts run out the
//! last response is handed back unchanged so the caller can still classify
//! it.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
  pub max_delay_ms:  u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { max_attempts: 3, base_delay_ms: 1_000, max_delay_ms: 10_000 }
  }
}

impl RetryPolicy {
  /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
  /// capped at `max_delay_ms`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    let delay  = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
    Duration::from_millis(delay)
  }

  /// Send the request built by `build`, retrying transient failures.
  ///
  /// `build` is called once per attempt since a sent request is consumed.
  pub async fn send<F>(&self, label: &str, build: F) -> Result<Response, reqwest::Error>
  where
    F: Fn() -> RequestBuilder,
  {
    let attempts = self.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      debug!(label, attempt, max_attempts = attempts, "sending request");

      match build().send().await {
        Ok(resp) if is_retryable(resp.status()) && attempt < attempts => {
          warn!(label, status = %resp.status(), attempt, "retryable status");
          let delay = retry_after(&resp)
            .map(|d| d.min(Duration::from_millis(self.max_delay_ms)))
            .unwrap_or_else(|| self.delay_for(attempt));
          sleep(delay).await;
        }
        Ok(resp) => return Ok(resp),
        Err(e) if attempt < attempts => {
          warn!(label, error = %e, attempt, "request failed");
          sleep(self.delay_for(attempt)).await;
        }
        Err(e) => return Err(e),
      }

      attempt += 1;
    }
  }
}

pub fn is_retryable(status: StatusCode) -> bool {
  status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `Retry-After` in whole seconds, when the server sent one.
fn retry_after(resp: &Response) -> Option<Duration> {
  resp
    .headers()
    .get(reqwest::header::RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse::<u64>()
    .ok()
    .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delays_double_and_cap() {
    let p = RetryPolicy { max_attempts: 5, base_delay_ms: 1_000, max_delay_ms: 3_000 };
    assert_eq!(p.delay_for(1), Duration::from_millis(1_000));
    assert_eq!(p.delay_for(2), Duration::from_millis(2_000));
    assert_eq!(p.delay_for(3), Duration::from_millis(3_000));
    assert_eq!(p.delay_for(30), Duration::from_millis(3_000));
  }

  #[test]
  fn retryable_statuses() {
    assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
    assert!(is_retryable(StatusCode::BAD_GATEWAY));
    assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    assert!(!is_retryable(StatusCode::NOT_FOUND));
  }
}
