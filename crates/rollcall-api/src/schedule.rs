//! Handler for `/schedule/{room}/{day}` — the room-schedule feed agents
//! poll on every tick.

use axum::{
  Json,
  extract::{Path, State},
};
use rollcall_core::{
  registry::ModelRegistry,
  schedule::{DayOfWeek, ScheduleEntry},
};

use crate::{AppState, auth::Authenticated, error::ApiError, registry_err};

/// `GET /schedule/{room}/{day}` — `day` spelled as the roster does
/// ("Monday", "Tuesday", …).
pub async fn for_room<R>(
  State(state): State<AppState<R>>,
  _auth: Authenticated,
  Path((room, day)): Path<(String, String)>,
) -> Result<Json<Vec<ScheduleEntry>>, ApiError>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  let day = DayOfWeek::parse(&day)
    .ok_or_else(|| ApiError::BadRequest(format!("unknown day of week: {day:?}")))?;

  let entries = state
    .registry
    .schedule_for_room(&room, day)
    .await
    .map_err(registry_err)?;
  Ok(Json(entries))
}
