//! Model records — the versioned unit the whole system distributes.
//!
//! A [`FaceModel`] row is immutable once committed. "Current" is not a flag:
//! the current model for a course is the row with the highest version, which
//! makes the at-most-one-current invariant structural.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of a course, owned by the external roster system.
pub type CourseId = i64;

/// Opaque identity of an enrolled member, owned by the external roster.
pub type MemberId = i64;

/// Classifier output index → member id.
///
/// Built at training time from the enrolled roster; the edge device needs it
/// to turn an inference result back into a person.
pub type LabelMap = BTreeMap<u32, MemberId>;

// ─── Registry records ────────────────────────────────────────────────────────

/// One committed, versioned classifier artifact for a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceModel {
  pub model_id:   Uuid,
  pub course_id:  CourseId,
  /// Strictly increasing and contiguous per course, starting at 1.
  pub version:    u32,
  /// Path of the artifact inside the orchestrator's artifact store.
  pub artifact_path:   String,
  pub label_map:       LabelMap,
  /// SHA-256 hex digest of the artifact bytes; devices verify downloads
  /// against it before activation.
  pub artifact_digest: String,
  pub created_at:      DateTime<Utc>,
  /// Enrollment count observed when this version was trained. Used to
  /// detect staleness: equal count on the next sweep means skip.
  pub last_enrollment_count: u32,
}

impl FaceModel {
  /// The device-visible metadata document for this model.
  pub fn metadata(&self) -> ModelMetadata {
    ModelMetadata {
      model_id:              self.model_id,
      course_id:             self.course_id,
      version:               self.version,
      label_map:             self.label_map.clone(),
      artifact_digest:       self.artifact_digest.clone(),
      last_enrollment_count: self.last_enrollment_count,
    }
  }
}

/// Input for committing a freshly trained model. The registry assigns
/// `model_id`, `version`, and `created_at`.
#[derive(Debug, Clone)]
pub struct NewModel {
  pub artifact_path:    String,
  pub label_map:        LabelMap,
  pub artifact_digest:  String,
  pub enrollment_count: u32,
}

/// What an edge device fetches to decide whether it must download: the
/// version, the digest to verify against, and the label map to persist
/// alongside the artifact. Carries the registry's `model_id` so the device
/// can acknowledge its assignment after the download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
  pub model_id:              Uuid,
  pub course_id:             CourseId,
  pub version:               u32,
  pub label_map:             LabelMap,
  pub artifact_digest:       String,
  pub last_enrollment_count: u32,
}

// ─── Assignments ─────────────────────────────────────────────────────────────

/// Lifecycle of an assignment. Transitions only pending → downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
  Pending,
  Downloaded,
}

/// A record that a specific device must fetch a specific model version.
///
/// Created by the orchestrator immediately after a model commits; updated
/// only by the device that downloads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAssignment {
  pub assignment_id: Uuid,
  pub device_id:     Uuid,
  pub model_id:      Uuid,
  pub status:        AssignmentStatus,
  pub created_at:    DateTime<Utc>,
  pub downloaded_at: Option<DateTime<Utc>>,
}
