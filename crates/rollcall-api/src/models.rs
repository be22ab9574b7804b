//! Handlers for `/models` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/models/{course_id}` | Current model's metadata; 404 if none |
//! | `GET`  | `/models/{course_id}/{version}/artifact` | Raw artifact bytes |

use axum::{
  Json,
  extract::{Path, State},
  http::header::{self, HeaderName},
  response::{IntoResponse, Response},
};
use bytes::Bytes;
use rollcall_core::{
  model::{CourseId, ModelMetadata},
  registry::ModelRegistry,
};

use crate::{AppState, auth::Authenticated, error::ApiError, registry_err};

/// `GET /models/{course_id}`
pub async fn metadata<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Path(course_id): Path<CourseId>,
) -> Result<Json<ModelMetadata>, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  let model = state
    .registry
    .get_current_model(course_id)
    .await
    .map_err(registry_err)?
    .ok_or_else(|| ApiError::NotFound(format!("no model for course {course_id}")))?;
  Ok(Json(model.metadata()))
}

/// `GET /models/{course_id}/{version}/artifact`
pub async fn artifact<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Path((course_id, version)): Path<(CourseId, u32)>,
) -> Result<Response, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  let model = state
    .registry
    .get_model(course_id, version)
    .await
    .map_err(registry_err)?
    .ok_or_else(|| {
      ApiError::NotFound(format!("no model v{version} for course {course_id}"))
    })?;

  let path = state.artifact_root.join(&model.artifact_path);
  let bytes = tokio::fs::read(&path).await?;

  Ok(
    (
      [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (HeaderName::from_static("x-artifact-digest"), model.artifact_digest),
      ],
      Bytes::from(bytes),
    )
      .into_response(),
  )
}
