//! Integration tests for `SqliteRegistry` against an in-memory database.

use chrono::NaiveTime;
use rollcall_core::{
  model::{AssignmentStatus, LabelMap, NewModel},
  registry::ModelRegistry,
  schedule::{DayOfWeek, ScheduleEntry},
};
use uuid::Uuid;

use crate::{Error, SqliteRegistry};

async fn registry() -> SqliteRegistry {
  SqliteRegistry::open_in_memory()
    .await
    .expect("in-memory registry")
}

fn new_model(count: u32) -> NewModel {
  let mut label_map = LabelMap::new();
  label_map.insert(0, 1001);
  label_map.insert(1, 1002);
  NewModel {
    artifact_path:    format!("course_5/model-{count}.bin"),
    label_map,
    artifact_digest:  "00".repeat(32),
    enrollment_count: count,
  }
}

fn entry(id: i64, course: i64, room: &str, day: DayOfWeek) -> ScheduleEntry {
  ScheduleEntry {
    entry_id:    id,
    course_id:   course,
    room:        room.into(),
    day_of_week: day,
    start_time:  NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    end_time:    NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
  }
}

// ─── Models ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_model_gets_version_one() {
  let r = registry().await;

  let model = r.upsert_model(5, new_model(10), None).await.unwrap();
  assert_eq!(model.version, 1);
  assert_eq!(model.course_id, 5);
  assert_eq!(model.last_enrollment_count, 10);

  let current = r.get_current_model(5).await.unwrap().unwrap();
  assert_eq!(current.model_id, model.model_id);
}

#[tokio::test]
async fn versions_are_contiguous() {
  let r = registry().await;

  let v1 = r.upsert_model(5, new_model(10), None).await.unwrap();
  let v2 = r.upsert_model(5, new_model(11), Some(v1.version)).await.unwrap();
  let v3 = r.upsert_model(5, new_model(12), Some(v2.version)).await.unwrap();

  assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));

  let current = r.get_current_model(5).await.unwrap().unwrap();
  assert_eq!(current.version, 3);
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
  let r = registry().await;

  r.upsert_model(5, new_model(10), None).await.unwrap();

  // A second writer still expecting "no model" must not commit version 1
  // again.
  let err = r.upsert_model(5, new_model(10), None).await.unwrap_err();
  match err {
    Error::VersionConflict { course_id, expected, found } => {
      assert_eq!(course_id, 5);
      assert_eq!(expected, None);
      assert_eq!(found, Some(1));
    }
    other => panic!("expected VersionConflict, got {other:?}"),
  }

  // Nothing was written by the losing side.
  let current = r.get_current_model(5).await.unwrap().unwrap();
  assert_eq!(current.version, 1);
}

#[tokio::test]
async fn get_model_fetches_specific_version() {
  let r = registry().await;

  r.upsert_model(5, new_model(10), None).await.unwrap();
  r.upsert_model(5, new_model(11), Some(1)).await.unwrap();

  let v1 = r.get_model(5, 1).await.unwrap().unwrap();
  assert_eq!(v1.last_enrollment_count, 10);
  assert!(r.get_model(5, 9).await.unwrap().is_none());
}

#[tokio::test]
async fn courses_are_versioned_independently() {
  let r = registry().await;

  r.upsert_model(5, new_model(10), None).await.unwrap();
  let other = r.upsert_model(6, new_model(4), None).await.unwrap();
  assert_eq!(other.version, 1);
}

// ─── Devices ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_device_is_idempotent_by_name() {
  let r = registry().await;

  let first  = r.register_device("pi-entrance", "B-204").await.unwrap();
  let second = r.register_device("pi-entrance", "B-204").await.unwrap();
  assert_eq!(first.device_id, second.device_id);

  // Re-registering with a new room relocates the device.
  let moved = r.register_device("pi-entrance", "C-101").await.unwrap();
  assert_eq!(moved.device_id, first.device_id);
  assert_eq!(moved.room, "C-101");

  assert_eq!(r.list_devices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn devices_in_room_filters_by_room() {
  let r = registry().await;

  r.register_device("pi-a", "B-204").await.unwrap();
  r.register_device("pi-b", "B-204").await.unwrap();
  r.register_device("pi-c", "C-101").await.unwrap();

  let in_b204 = r.devices_in_room("B-204").await.unwrap();
  assert_eq!(in_b204.len(), 2);
  assert!(in_b204.iter().all(|d| d.room == "B-204"));
}

// ─── Schedule mirror ─────────────────────────────────────────────────────────

#[tokio::test]
async fn replace_schedule_swaps_the_snapshot() {
  let r = registry().await;

  r.replace_schedule(vec![
    entry(1, 5, "B-204", DayOfWeek::Monday),
    entry(2, 6, "C-101", DayOfWeek::Monday),
  ])
  .await
  .unwrap();

  let monday = r.schedule_for_room("B-204", DayOfWeek::Monday).await.unwrap();
  assert_eq!(monday.len(), 1);
  assert_eq!(monday[0].course_id, 5);

  // A fresh snapshot fully replaces the previous one.
  r.replace_schedule(vec![entry(3, 7, "B-204", DayOfWeek::Tuesday)])
    .await
    .unwrap();
  assert!(
    r.schedule_for_room("B-204", DayOfWeek::Monday)
      .await
      .unwrap()
      .is_empty()
  );
  assert_eq!(r.list_courses().await.unwrap(), vec![7]);
}

#[tokio::test]
async fn rooms_for_course_traverses_schedule() {
  let r = registry().await;

  r.replace_schedule(vec![
    entry(1, 5, "B-204", DayOfWeek::Monday),
    entry(2, 5, "C-101", DayOfWeek::Wednesday),
    entry(3, 6, "C-101", DayOfWeek::Friday),
  ])
  .await
  .unwrap();

  let rooms = r.rooms_for_course(5).await.unwrap();
  assert_eq!(rooms, vec!["B-204".to_string(), "C-101".to_string()]);
  assert_eq!(r.list_courses().await.unwrap(), vec![5, 6]);
}

// ─── Assignments ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn assign_model_is_idempotent() {
  let r = registry().await;

  let device = r.register_device("pi-a", "B-204").await.unwrap();
  let model  = r.upsert_model(5, new_model(10), None).await.unwrap();

  let first  = r.assign_model(device.device_id, model.model_id).await.unwrap();
  let second = r.assign_model(device.device_id, model.model_id).await.unwrap();

  assert_eq!(first.assignment_id, second.assignment_id);
  assert_eq!(first.status, AssignmentStatus::Pending);

  let pending = r.list_pending_assignments(device.device_id).await.unwrap();
  assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn mark_downloaded_transitions_once() {
  let r = registry().await;

  let device = r.register_device("pi-a", "B-204").await.unwrap();
  let model  = r.upsert_model(5, new_model(10), None).await.unwrap();
  r.assign_model(device.device_id, model.model_id).await.unwrap();

  assert!(r.mark_downloaded(device.device_id, model.model_id).await.unwrap());
  // Second ack is a no-op, not an error.
  assert!(!r.mark_downloaded(device.device_id, model.model_id).await.unwrap());

  assert!(
    r.list_pending_assignments(device.device_id)
      .await
      .unwrap()
      .is_empty()
  );

  // The ack stamped the device's per-course version and last_seen.
  let versions = r.device_versions(device.device_id).await.unwrap();
  assert_eq!(versions.get(&5), Some(&1));
  let device = r.get_device(device.device_id).await.unwrap().unwrap();
  assert!(device.last_seen.is_some());
}

#[tokio::test]
async fn reassigning_a_downloaded_model_stays_downloaded() {
  let r = registry().await;

  let device = r.register_device("pi-a", "B-204").await.unwrap();
  let model  = r.upsert_model(5, new_model(10), None).await.unwrap();
  r.assign_model(device.device_id, model.model_id).await.unwrap();
  r.mark_downloaded(device.device_id, model.model_id).await.unwrap();

  // Status never moves backward.
  let again = r.assign_model(device.device_id, model.model_id).await.unwrap();
  assert_eq!(again.status, AssignmentStatus::Downloaded);
  assert!(
    r.list_pending_assignments(device.device_id)
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn mark_downloaded_for_unknown_model_errors() {
  let r = registry().await;
  let device = r.register_device("pi-a", "B-204").await.unwrap();

  let err = r
    .mark_downloaded(device.device_id, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ModelNotFound(_)));
}
