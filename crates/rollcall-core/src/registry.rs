//! The `ModelRegistry` trait — the single source of truth both sides
//! synchronize through.
//!
//! Implemented by storage backends (e.g. `rollcall-registry-sqlite`).
//! The orchestrator and the API layer depend on this abstraction, not on
//! any concrete backend.

use std::collections::BTreeMap;
use std::future::Future;

use uuid::Uuid;

use crate::{
  device::Device,
  model::{CourseId, FaceModel, ModelAssignment, NewModel},
  schedule::{DayOfWeek, ScheduleEntry},
};

/// Abstraction over the durable registry of models, devices, assignments,
/// and the schedule mirror.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ModelRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Models ────────────────────────────────────────────────────────────

  /// The current (highest-version) model for a course, if any.
  fn get_current_model(
    &self,
    course_id: CourseId,
  ) -> impl Future<Output = Result<Option<FaceModel>, Self::Error>> + Send + '_;

  /// A specific committed version, if it exists.
  fn get_model(
    &self,
    course_id: CourseId,
    version: u32,
  ) -> impl Future<Output = Result<Option<FaceModel>, Self::Error>> + Send + '_;

  /// Look a model up by its registry id (the key assignments carry).
  fn get_model_by_id(
    &self,
    model_id: Uuid,
  ) -> impl Future<Output = Result<Option<FaceModel>, Self::Error>> + Send + '_;

  /// Commit a freshly trained model as `expected_version + 1` (or 1 when
  /// `expected_version` is `None`).
  ///
  /// The version check and the insert are indivisible: if the course's
  /// current version no longer equals `expected_version`, the commit fails
  /// with a version conflict and nothing is written.
  fn upsert_model(
    &self,
    course_id: CourseId,
    input: NewModel,
    expected_version: Option<u32>,
  ) -> impl Future<Output = Result<FaceModel, Self::Error>> + Send + '_;

  // ── Devices ───────────────────────────────────────────────────────────

  /// Register a device by stable name, or update its room if it already
  /// exists. Idempotent.
  fn register_device<'a>(
    &'a self,
    name: &'a str,
    room: &'a str,
  ) -> impl Future<Output = Result<Device, Self::Error>> + Send + 'a;

  fn get_device(
    &self,
    device_id: Uuid,
  ) -> impl Future<Output = Result<Option<Device>, Self::Error>> + Send + '_;

  fn list_devices(
    &self,
  ) -> impl Future<Output = Result<Vec<Device>, Self::Error>> + Send + '_;

  /// Per-course versions this device last acknowledged downloading.
  fn device_versions(
    &self,
    device_id: Uuid,
  ) -> impl Future<Output = Result<BTreeMap<CourseId, u32>, Self::Error>> + Send + '_;

  // ── Relation traversal ────────────────────────────────────────────────

  /// Rooms that hold at least one schedule entry for `course_id`.
  fn rooms_for_course(
    &self,
    course_id: CourseId,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  fn devices_in_room<'a>(
    &'a self,
    room: &'a str,
  ) -> impl Future<Output = Result<Vec<Device>, Self::Error>> + Send + 'a;

  /// Distinct course ids present in the schedule mirror — the population
  /// the retrain sweep iterates.
  fn list_courses(
    &self,
  ) -> impl Future<Output = Result<Vec<CourseId>, Self::Error>> + Send + '_;

  // ── Schedule mirror ───────────────────────────────────────────────────

  /// Replace the entire schedule mirror with a fresh snapshot from the
  /// roster feed.
  fn replace_schedule(
    &self,
    entries: Vec<ScheduleEntry>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn schedule_for_room<'a>(
    &'a self,
    room: &'a str,
    day: DayOfWeek,
  ) -> impl Future<Output = Result<Vec<ScheduleEntry>, Self::Error>> + Send + 'a;

  // ── Assignments ───────────────────────────────────────────────────────

  /// Upsert a pending assignment. Re-assigning an already-pending or
  /// already-downloaded (device, model) pair returns the existing row
  /// unchanged.
  fn assign_model(
    &self,
    device_id: Uuid,
    model_id: Uuid,
  ) -> impl Future<Output = Result<ModelAssignment, Self::Error>> + Send + '_;

  fn list_pending_assignments(
    &self,
    device_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ModelAssignment>, Self::Error>> + Send + '_;

  /// Acknowledge a completed download. Idempotent: returns `false` (not an
  /// error) when the assignment was already downloaded. Also stamps the
  /// device's per-course version and `last_seen`.
  fn mark_downloaded(
    &self,
    device_id: Uuid,
    model_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
