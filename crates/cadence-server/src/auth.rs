//! HTTP Basic-auth extractor for the admin API.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

use crate::{AppState, error::Error};

/// The single admin account.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

/// Present in a handler's arguments means the request was authenticated.
pub struct Authenticated;

pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<(), Error> {
  let encoded = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Basic "))
    .ok_or(Error::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| Error::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| Error::Unauthorized)?;
  let (username, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;

  if username != config.username {
    return Err(Error::Unauthorized);
  }

  let parsed = PasswordHash::new(&config.password_hash).map_err(|_| Error::Unauthorized)?;
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .map_err(|_| Error::Unauthorized)
}

impl<S, P, K> FromRequestParts<AppState<S, P, K>> for Authenticated
where
  S: Send + Sync,
  P: Send + Sync,
  K: Send + Sync,
{
  type Rejection = Error;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S, P, K>) -> Result<Self, Self::Rejection> {
    verify_auth(&parts.headers, &state.auth)?;
    Ok(Authenticated)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use argon2::{PasswordHasher, password_hash::SaltString};
  use rand_core::OsRng;

  fn config(password: &str) -> AuthConfig {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt).unwrap().to_string();
    AuthConfig { username: "admin".into(), password_hash: hash }
  }

  fn headers(value: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::AUTHORIZATION, value.parse().unwrap());
    h
  }

  fn basic(user: &str, pass: &str) -> String { format!("Basic {}", B64.encode(format!("{user}:{pass}"))) }

  #[test]
  fn correct_credentials() {
    assert!(verify_auth(&headers(&basic("admin", "secret")), &config("secret")).is_ok());
  }

  #[test]
  fn wrong_password() {
    let res = verify_auth(&headers(&basic("admin", "nope")), &config("secret"));
    assert!(matches!(res, Err(Error::Unauthorized)));
  }

  #[test]
  fn wrong_user() {
    let res = verify_auth(&headers(&basic("root", "secret")), &config("secret"));
    assert!(matches!(res, Err(Error::Unauthorized)));
  }

  #[test]
  fn missing_or_garbled_header() {
    let cfg = config("secret");
    assert!(verify_auth(&HeaderMap::new(), &cfg).is_err());
    assert!(verify_auth(&headers("Basic !!!not-base64!!!"), &cfg).is_err());
    assert!(verify_auth(&headers("Bearer abc"), &cfg).is_err());
  }
}
