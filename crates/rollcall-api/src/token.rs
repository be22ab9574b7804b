//! Handler for `POST /token` — the credential → bearer-token exchange.

use axum::{Json, extract::State};
use rollcall_core::registry::ModelRegistry;
use serde::{Deserialize, Serialize};

use crate::{AppState, auth::verify_credentials, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
  pub token:      String,
  /// Seconds until the token expires.
  pub expires_in: u64,
}

/// `POST /token` — body: `{"username":"…","password":"…"}`
pub async fn exchange<R>(
  State(state): State<AppState<R>>,
  Json(body): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  verify_credentials(&body.username, &body.password, &state.auth)?;

  let token = state.tokens.mint();
  Ok(Json(TokenResponse {
    token,
    expires_in: state.tokens.ttl().as_secs(),
  }))
}
