//! [`SlackClient`]: Slack's Web API as a [`StatusSink`].
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error":
//! "<code>"}`; those codes are classified by [`SinkError::from_code`].

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use cadence_core::sink::{SinkError, StatusSink, StatusUpdate};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
  pub api_base: String,
}

impl Default for SlackConfig {
  fn default() -> Self { Self { api_base: "https://slack.com/api".into() } }
}

/// The inner [`reqwest::Client`] is `Arc`-based, so clones share a pool.
#[derive(Clone)]
pub struct SlackClient {
  http:   Client,
  config: SlackConfig,
  retry:  RetryPolicy,
}

impl SlackClient {
  pub fn new(http: Client, config: SlackConfig, retry: RetryPolicy) -> Self {
    Self { http, config, retry }
  }

  fn url(&self, method: &str) -> String {
    format!("{}/{}", self.config.api_base.trim_end_matches('/'), method)
  }

  async fn post_json<B: Serialize>(&self, method: &str, token: &str, body: &B) -> Result<Envelope, SinkError> {
    let url  = self.url(method);
    let resp = self
      .retry
      .send(method, || self.http.post(&url).bearer_auth(token).json(body))
      .await
      .map_err(network)?;
    read_envelope(resp).await
  }
}

impl StatusSink for SlackClient {
  async fn set_status<'a>(&'a self, token: &'a str, update: &'a StatusUpdate) -> Result<(), SinkError> {
    let body = ProfileSet {
      profile: Profile {
        status_text:       &update.text,
        status_emoji:      &update.emoji,
        status_expiration: update.expires_at.map_or(0, |at| at.timestamp()),
      },
    };
    self.post_json("users.profile.set", token, &body).await?;
    Ok(())
  }

  async fn get_status_text<'a>(&'a self, token: &'a str, user_id: &'a str) -> Result<String, SinkError> {
    let url  = self.url("users.profile.get");
    let resp = self
      .retry
      .send("users.profile.get", || {
        self.http.get(&url).bearer_auth(token).query(&[("user", user_id)])
      })
      .await
      .map_err(network)?;

    let envelope = read_envelope(resp).await?;
    Ok(
      envelope
        .profile
        .and_then(|p| p.status_text)
        .unwrap_or_default(),
    )
  }

  async fn post_message<'a>(&'a self, token: &'a str, channel: &'a str, text: &'a str) -> Result<(), SinkError> {
    let body = PostMessage { channel, text };
    self.post_json("chat.postMessage", token, &body).await?;
    Ok(())
  }
}

// ─── Responses ───────────────────────────────────────────────────────────────

fn network(e: reqwest::Error) -> SinkError { SinkError::Transient(e.to_string()) }

async fn read_envelope(resp: Response) -> Result<Envelope, SinkError> {
  let status = resp.status();
  if status == StatusCode::TOO_MANY_REQUESTS {
    return Err(SinkError::RateLimited);
  }
  if status.is_server_error() {
    return Err(SinkError::Transient(status.to_string()));
  }
  let body = resp.text().await.map_err(network)?;
  parse_envelope(status, &body)
}

/// Decode a Slack response body, turning `ok: false` into a classified
/// error.
pub fn parse_envelope(status: StatusCode, body: &str) -> Result<Envelope, SinkError> {
  let envelope: Envelope = serde_json::from_str(body)
    .map_err(|e| SinkError::Api(format!("{status}: {e}")))?;
  if envelope.ok {
    Ok(envelope)
  } else {
    let code = envelope.error.as_deref().unwrap_or("unknown_error");
    Err(SinkError::from_code(code))
  }
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
  pub ok:      bool,
  pub error:   Option<String>,
  pub profile: Option<ProfileView>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileView {
  pub status_text: Option<String>,
}

#[derive(Serialize)]
struct ProfileSet<'a> {
  profile: Profile<'a>,
}

#[derive(Serialize)]
struct Profile<'a> {
  status_text:       &'a str,
  status_emoji:      &'a str,
  /// Epoch seconds; `0` means no expiration.
  status_expiration: i64,
}

#[derive(Serialize)]
struct PostMessage<'a> {
  channel: &'a str,
  text:    &'a str,
}
