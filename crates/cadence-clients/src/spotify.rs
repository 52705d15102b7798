//! [`SpotifyClient`]: the Spotify Web API as a [`PlaybackSource`].

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use cadence_core::{
  playback::{ContentType, Device, PlaybackSnapshot},
  source::{PlaybackSource, SourceError, TokenGrant},
};

use crate::retry::RetryPolicy;

/// Performer shown when a track lists no artists.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

const INVALID_TOKEN_MARKERS: &[&str] = &["invalid_grant", "invalid token", "the access token expired"];

/// True when a Spotify error message means the credential is unusable.
pub fn is_invalid_token_message(message: &str) -> bool {
  let message = message.to_ascii_lowercase();
  INVALID_TOKEN_MARKERS.iter().any(|m| message.contains(m))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
  pub client_id:     String,
  pub client_secret: String,
  pub api_base:      String,
  pub accounts_base: String,
}

impl Default for SpotifyConfig {
  fn default() -> Self {
    Self {
      client_id:     String::new(),
      client_secret: String::new(),
      api_base:      "https://api.spotify.com".into(),
      accounts_base: "https://accounts.spotify.com".into(),
    }
  }
}

/// The inner [`reqwest::Client`] is `Arc`-based, so clones share a pool.
#[derive(Clone)]
pub struct SpotifyClient {
  http:   Client,
  config: SpotifyConfig,
  retry:  RetryPolicy,
}

impl SpotifyClient {
  pub fn new(http: Client, config: SpotifyConfig, retry: RetryPolicy) -> Self {
    Self { http, config, retry }
  }

  fn api(&self, path: &str) -> String {
    format!("{}/v1{}", self.config.api_base.trim_end_matches('/'), path)
  }

  async fn player_command(&self, path: &str, access_token: &str) -> Result<(), SourceError> {
    let url  = self.api(path);
    let resp = self
      .retry
      .send("spotify player command", || {
        self.http.put(&url).bearer_auth(access_token).body("")
      })
      .await
      .map_err(network)?;

    if resp.status().is_success() {
      tracing::debug!(path, "player command accepted");
      Ok(())
    } else {
      Err(error_from_response(resp).await)
    }
  }
}

impl PlaybackSource for SpotifyClient {
  async fn current_playback<'a>(
    &'a self,
    access_token: &'a str,
  ) -> Result<Option<PlaybackSnapshot>, SourceError> {
    let url  = self.api("/me/player?additional_types=track,episode");
    let resp = self
      .retry
      .send("spotify current playback", || self.http.get(&url).bearer_auth(access_token))
      .await
      .map_err(network)?;

    match resp.status() {
      StatusCode::NO_CONTENT => return Ok(None),
      s if s.is_success() => {}
      _ => {
        return match error_from_response(resp).await {
          SourceError::NoActiveDevice => Ok(None),
          e => Err(e),
        };
      }
    }

    let body = resp.text().await.map_err(network)?;
    parse_player_state(&body)
  }

  async fn refresh<'a>(&'a self, refresh_token: &'a str) -> Result<TokenGrant, SourceError> {
    let url = format!("{}/api/token", self.config.accounts_base.trim_end_matches('/'));
    let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];

    let resp = self
      .retry
      .send("spotify token refresh", || {
        self
          .http
          .post(&url)
          .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
          .form(&form)
      })
      .await
      .map_err(network)?;

    if !resp.status().is_success() {
      return Err(error_from_response(resp).await);
    }

    let body: TokenResponse = resp
      .json()
      .await
      .map_err(|e| SourceError::Api(format!("token response: {e}")))?;

    Ok(TokenGrant {
      access_token:  body.access_token,
      refresh_token: body.refresh_token,
      expires_in:    chrono::Duration::seconds(body.expires_in),
    })
  }

  async fn devices<'a>(&'a self, access_token: &'a str) -> Result<Vec<Device>, SourceError> {
    let url  = self.api("/me/player/devices");
    let resp = self
      .retry
      .send("spotify devices", || self.http.get(&url).bearer_auth(access_token))
      .await
      .map_err(network)?;

    if !resp.status().is_success() {
      return Err(error_from_response(resp).await);
    }

    let body: DevicesResponse = resp
      .json()
      .await
      .map_err(|e| SourceError::Api(format!("devices response: {e}")))?;
    Ok(body.devices.into_iter().map(WireDevice::into_device).collect())
  }

  async fn pause<'a>(&'a self, access_token: &'a str) -> Result<(), SourceError> {
    self.player_command("/me/player/pause", access_token).await
  }

  async fn resume<'a>(&'a self, access_token: &'a str) -> Result<(), SourceError> {
    self.player_command("/me/player/play", access_token).await
  }
}

// ─── Error classification ────────────────────────────────────────────────────

fn network(e: reqwest::Error) -> SourceError { SourceError::Transient(e.to_string()) }

async fn error_from_response(resp: Response) -> SourceError {
  let status = resp.status();
  let body   = resp.text().await.unwrap_or_default();
  classify(status, &body)
}

/// Map a non-success Spotify response to a [`SourceError`].
pub fn classify(status: StatusCode, body: &str) -> SourceError {
  let message = error_message(body).unwrap_or_else(|| status.to_string());

  match status {
    StatusCode::UNAUTHORIZED => SourceError::Unauthorized(message),
    StatusCode::FORBIDDEN => SourceError::PremiumRequired,
    StatusCode::NOT_FOUND => SourceError::NoActiveDevice,
    StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited,
    s if s.is_server_error() => SourceError::Transient(message),
    _ if is_invalid_token_message(&message) => SourceError::Unauthorized(message),
    _ => SourceError::Api(message),
  }
}

/// Pull a message out of either error shape Spotify uses: the Web API's
/// `{"error": {"message": ..}}` or the accounts service's
/// `{"error": "invalid_grant", "error_description": ..}`.
fn error_message(body: &str) -> Option<String> {
  let value: serde_json::Value = serde_json::from_str(body).ok()?;
  let error = value.get("error")?;
  if let Some(code) = error.as_str() {
    let description = value.get("error_description").and_then(|d| d.as_str());
    return Some(match description {
      Some(d) => format!("{code}: {d}"),
      None    => code.to_owned(),
    });
  }
  error.get("message")?.as_str().map(str::to_owned)
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
  access_token:  String,
  refresh_token: Option<String>,
  expires_in:    i64,
}

#[derive(Deserialize)]
struct DevicesResponse {
  #[serde(default)]
  devices: Vec<WireDevice>,
}

#[derive(Deserialize)]
struct WireDevice {
  id:        Option<String>,
  #[serde(default)]
  name:      String,
  #[serde(rename = "type", default)]
  kind:      String,
  #[serde(default)]
  is_active: bool,
}

impl WireDevice {
  fn into_device(self) -> Device {
    Device { id: self.id, name: self.name, kind: self.kind, is_active: self.is_active }
  }
}

#[derive(Deserialize)]
struct Named {
  name: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireItem {
  Track {
    id:          Option<String>,
    name:        String,
    duration_ms: Option<u64>,
    #[serde(default)]
    artists:     Vec<Named>,
  },
  Episode {
    id:          Option<String>,
    name:        String,
    duration_ms: Option<u64>,
    show:        Option<Named>,
  },
  #[serde(other)]
  Other,
}

#[derive(Deserialize)]
struct PlayerState {
  #[serde(default)]
  is_playing:  bool,
  progress_ms: Option<u64>,
  device:      Option<WireDevice>,
  item:        Option<WireItem>,
}

/// Decode a `/me/player` body. Ads, unknown item types and a missing item
/// all read as nothing playing.
pub fn parse_player_state(body: &str) -> Result<Option<PlaybackSnapshot>, SourceError> {
  let state: PlayerState = serde_json::from_str(body)
    .map_err(|e| SourceError::Api(format!("player state: {e}")))?;

  let (id, title, performer, duration_ms, content_type) = match state.item {
    Some(WireItem::Track { id, name, duration_ms, artists }) => {
      let performer = artists
        .into_iter()
        .next()
        .map(|a| a.name)
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_owned());
      (id, name, performer, duration_ms, ContentType::Track)
    }
    Some(WireItem::Episode { id, name, duration_ms, show }) => {
      let performer = show.map(|s| s.name).unwrap_or_default();
      (id, name, performer, duration_ms, ContentType::Episode)
    }
    Some(WireItem::Other) | None => return Ok(None),
  };

  // Local files carry no id; their title stands in so track changes are
  // still noticed.
  let track_id = id.unwrap_or_else(|| format!("local:{title}"));

  Ok(Some(PlaybackSnapshot {
    track_id,
    title,
    performer,
    is_playing: state.is_playing,
    duration_ms,
    progress_ms: state.progress_ms,
    device: state.device.map(WireDevice::into_device),
    content_type,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  const TRACK_BODY: &str = r#"{
    "is_playing": true,
    "progress_ms": 5000,
    "currently_playing_type": "track",
    "device": { "id": "D1", "name": "Desk", "type": "Computer", "is_active": true },
    "item": {
      "type": "track",
      "id": "t1",
      "name": "Teardrop",
      "duration_ms": 330000,
      "artists": [{ "name": "Massive Attack" }, { "name": "Elizabeth Fraser" }]
    }
  }"#;

  #[test]
  fn parses_track_with_first_artist() {
    let snap = parse_player_state(TRACK_BODY).unwrap().unwrap();
    assert_eq!(snap.track_id, "t1");
    assert_eq!(snap.title, "Teardrop");
    assert_eq!(snap.performer, "Massive Attack");
    assert_eq!(snap.remaining_ms(), Some(325_000));
    assert_eq!(snap.device_id(), Some("D1"));
    assert_eq!(snap.content_type, ContentType::Track);
  }

  #[test]
  fn parses_episode_with_show_as_performer() {
    let body = r#"{
      "is_playing": true,
      "progress_ms": 0,
      "device": null,
      "item": { "type": "episode", "id": "e1", "name": "Ep 1", "duration_ms": 1000,
                "show": { "name": "The Show" } }
    }"#;
    let snap = parse_player_state(body).unwrap().unwrap();
    assert_eq!(snap.performer, "The Show");
    assert_eq!(snap.content_type, ContentType::Episode);
    assert!(snap.device.is_none());
  }

  #[test]
  fn track_without_artists_uses_fallback() {
    let body = r#"{ "is_playing": true, "item": { "type": "track", "id": "t", "name": "n",
                    "artists": [] } }"#;
    let snap = parse_player_state(body).unwrap().unwrap();
    assert_eq!(snap.performer, UNKNOWN_ARTIST);
    assert_eq!(snap.duration_ms, None);
  }

  #[test]
  fn ads_and_missing_items_are_nothing() {
    let ad = r#"{ "is_playing": true, "item": { "type": "ad" } }"#;
    assert!(parse_player_state(ad).unwrap().is_none());
    let none = r#"{ "is_playing": false, "item": null }"#;
    assert!(parse_player_state(none).unwrap().is_none());
  }

  #[test]
  fn classifies_statuses() {
    let expired = r#"{"error": {"status": 401, "message": "The access token expired"}}"#;
    assert!(matches!(classify(StatusCode::UNAUTHORIZED, expired), SourceError::Unauthorized(m) if m.contains("expired")));
    assert!(matches!(classify(StatusCode::FORBIDDEN, ""), SourceError::PremiumRequired));
    assert!(matches!(classify(StatusCode::NOT_FOUND, ""), SourceError::NoActiveDevice));
    assert!(matches!(classify(StatusCode::TOO_MANY_REQUESTS, ""), SourceError::RateLimited));
    assert!(matches!(classify(StatusCode::BAD_GATEWAY, ""), SourceError::Transient(_)));
  }

  #[test]
  fn invalid_grant_on_refresh_is_unauthorized() {
    let body = r#"{"error": "invalid_grant", "error_description": "Refresh token revoked"}"#;
    assert!(matches!(classify(StatusCode::BAD_REQUEST, body), SourceError::Unauthorized(_)));
  }

  #[test]
  fn other_client_errors_are_api_errors() {
    let body = r#"{"error": {"status": 400, "message": "Malformed json"}}"#;
    assert!(matches!(classify(StatusCode::BAD_REQUEST, body), SourceError::Api(m) if m == "Malformed json"));
  }
}
