//! Error type for `rollcall-registry-sqlite`.

use rollcall_core::model::CourseId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rollcall_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored string column did not decode back into its domain type.
  #[error("decode error: {0}")]
  Decode(String),

  /// The compare-and-swap inside `upsert_model` observed a different
  /// current version than the caller expected.
  #[error("version conflict for course {course_id}: expected {expected:?}, found {found:?}")]
  VersionConflict {
    course_id: CourseId,
    expected:  Option<u32>,
    found:     Option<u32>,
  },

  #[error("device not found: {0}")]
  DeviceNotFound(uuid::Uuid),

  #[error("model not found: {0}")]
  ModelNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
