//! Bearer-token auth: credential verification, token minting, and the
//! request extractor.
//!
//! Agents exchange the fleet credentials for a short-lived random token via
//! `POST /token`, then present it as `Authorization: Bearer <token>` on
//! every other call. On a 401 the agent re-authenticates; tokens are held
//! in memory only and die with the process.

use std::{
  collections::HashMap,
  sync::Mutex,
  time::{Duration, Instant},
};

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use rand_core::{OsRng, RngCore};
use rollcall_core::registry::ModelRegistry;

use crate::{AppState, error::ApiError};

/// Credentials accepted as valid for this server instance.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

/// Verify a username/password pair against the configured credentials.
pub fn verify_credentials(
  username: &str,
  password: &str,
  config: &AuthConfig,
) -> Result<(), ApiError> {
  if username != config.username {
    return Err(ApiError::Unauthorized);
  }

  let parsed_hash =
    PasswordHash::new(&config.password_hash).map_err(|_| ApiError::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Ok(())
}

// ─── Token store ─────────────────────────────────────────────────────────────

/// In-memory store of issued bearer tokens and their expiry instants.
pub struct TokenStore {
  ttl:    Duration,
  tokens: Mutex<HashMap<String, Instant>>,
}

impl TokenStore {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl, tokens: Mutex::new(HashMap::new()) }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Mint a fresh token: 32 random bytes, hex-encoded.
  pub fn mint(&self) -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let token = hex::encode(bytes);

    let mut tokens = self.tokens.lock().expect("token store poisoned");
    let now = Instant::now();
    tokens.retain(|_, expiry| *expiry > now);
    tokens.insert(token.clone(), now + self.ttl);
    token
  }

  /// Whether `token` was issued by this store and has not expired.
  pub fn verify(&self, token: &str) -> bool {
    let tokens = self.tokens.lock().expect("token store poisoned");
    tokens.get(token).is_some_and(|expiry| *expiry > Instant::now())
  }
}

/// Zero-size marker: present in the handler means the request carried a
/// valid bearer token.
pub struct Authenticated;

/// Verify the bearer token directly from headers.
pub fn verify_bearer(headers: &HeaderMap, tokens: &TokenStore) -> Result<(), ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let token = header_val
    .strip_prefix("Bearer ")
    .ok_or(ApiError::Unauthorized)?;

  if !tokens.verify(token) {
    return Err(ApiError::Unauthorized);
  }
  Ok(())
}

impl<R> FromRequestParts<AppState<R>> for Authenticated
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<R>,
  ) -> Result<Self, Self::Rejection> {
    verify_bearer(&parts.headers, &state.tokens)?;
    Ok(Authenticated)
  }
}
