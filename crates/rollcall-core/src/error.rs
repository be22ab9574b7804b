//! Error taxonomy for `rollcall-core`.

use thiserror::Error;

use crate::model::CourseId;

#[derive(Debug, Error)]
pub enum Error {
  /// Token missing, expired, or rejected. The caller must re-authenticate
  /// before retrying.
  #[error("authentication rejected")]
  Authentication,

  /// Network-level failure (connect, timeout). Transient: the next poll or
  /// cron cycle is the retry path.
  #[error("connectivity failure: {0}")]
  Connectivity(String),

  /// The course produced an empty feature/label set. A skip, not a failure
  /// state for the course.
  #[error("no training data for course {0}")]
  NoTrainingData(CourseId),

  /// A concurrent registry write was detected. The caller must re-read the
  /// current version and retry.
  #[error("version conflict for course {course_id}: expected {expected:?}, found {found:?}")]
  VersionConflict {
    course_id: CourseId,
    expected:  Option<u32>,
    found:     Option<u32>,
  },

  /// An artifact failed verification on activation. The previous model
  /// stays active; the candidate is discarded.
  #[error("model failed to load: {0}")]
  ModelLoad(String),

  /// The training capability itself failed.
  #[error("training failed: {0}")]
  Training(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the condition is expected to clear on its own by the next
  /// cycle, without operator intervention.
  pub fn is_transient(&self) -> bool {
    matches!(self, Error::Connectivity(_) | Error::Authentication)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
