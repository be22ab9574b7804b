//! HTTP layer for the Rollcall model registry.
//!
//! Exposes an axum [`Router`] backed by any
//! [`ModelRegistry`](rollcall_core::registry::ModelRegistry). Edge agents use
//! it to exchange credentials for a bearer token, register themselves, poll
//! their room schedule, and pull model metadata, artifacts, and assignments.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", rollcall_api::router(state))
//! ```

pub mod auth;
pub mod devices;
pub mod error;
pub mod models;
pub mod schedule;
pub mod token;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use rollcall_core::registry::ModelRegistry;

pub use auth::{AuthConfig, TokenStore};
pub use error::ApiError;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<R: ModelRegistry> {
  pub registry:      Arc<R>,
  /// Directory that `FaceModel::artifact_path` values are relative to.
  pub artifact_root: PathBuf,
  pub auth:          Arc<AuthConfig>,
  pub tokens:        Arc<TokenStore>,
}

impl<R: ModelRegistry> Clone for AppState<R> {
  fn clone(&self) -> Self {
    Self {
      registry:      Arc::clone(&self.registry),
      artifact_root: self.artifact_root.clone(),
      auth:          Arc::clone(&self.auth),
      tokens:        Arc::clone(&self.tokens),
    }
  }
}

/// Convert an opaque registry error into an [`ApiError`].
pub(crate) fn registry_err<E>(e: E) -> ApiError
where
  E: std::error::Error + Send + Sync + 'static,
{
  ApiError::Registry(Box::new(e))
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised registry router for `state`.
///
/// Every route except `POST /token` requires a bearer token.
pub fn router<R>(state: AppState<R>) -> Router
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    .route("/token", post(token::exchange::<R>))
    .route("/devices", post(devices::register::<R>))
    .route(
      "/devices/{id}/assignments",
      get(devices::pending_assignments::<R>),
    )
    .route(
      "/devices/{id}/assignments/{model_id}/downloaded",
      post(devices::ack_downloaded::<R>),
    )
    .route("/schedule/{room}/{day}", get(schedule::for_room::<R>))
    .route("/models/{course_id}", get(models::metadata::<R>))
    .route(
      "/models/{course_id}/{version}/artifact",
      get(models::artifact::<R>),
    )
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────
