//! Handlers for `/devices` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/devices` | Register/relocate by stable name; idempotent |
//! | `GET`  | `/devices/{id}/assignments` | Pending assignments only |
//! | `POST` | `/devices/{id}/assignments/{model_id}/downloaded` | Ack |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use rollcall_core::{device::Device, model::ModelAssignment, registry::ModelRegistry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError, registry_err};

// ─── Register ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
  pub name: String,
  pub room: String,
}

/// `POST /devices` — body: `{"name":"pi-entrance","room":"B-204"}`
pub async fn register<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  if body.name.is_empty() || body.room.is_empty() {
    return Err(ApiError::BadRequest("name and room must be non-empty".into()));
  }

  let device: Device = state
    .registry
    .register_device(&body.name, &body.room)
    .await
    .map_err(registry_err)?;
  Ok((StatusCode::CREATED, Json(device)))
}

// ─── Assignments ─────────────────────────────────────────────────────────────

/// `GET /devices/{id}/assignments`
pub async fn pending_assignments<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Path(device_id): Path<Uuid>,
) -> Result<Json<Vec<ModelAssignment>>, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  state
    .registry
    .get_device(device_id)
    .await
    .map_err(registry_err)?
    .ok_or_else(|| ApiError::NotFound(format!("device {device_id} not found")))?;

  let pending = state
    .registry
    .list_pending_assignments(device_id)
    .await
    .map_err(registry_err)?;
  Ok(Json(pending))
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
  /// `false` means the assignment was already downloaded — not an error.
  pub updated: bool,
}

/// `POST /devices/{id}/assignments/{model_id}/downloaded`
pub async fn ack_downloaded<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Path((device_id, model_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AckResponse>, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  state
    .registry
    .get_device(device_id)
    .await
    .map_err(registry_err)?
    .ok_or_else(|| ApiError::NotFound(format!("device {device_id} not found")))?;

  state
    .registry
    .get_model_by_id(model_id)
    .await
    .map_err(registry_err)?
    .ok_or_else(|| ApiError::NotFound(format!("model {model_id} not found")))?;

  let updated = state
    .registry
    .mark_downloaded(device_id, model_id)
    .await
    .map_err(registry_err)?;
  Ok(Json(AckResponse { updated }))
}
