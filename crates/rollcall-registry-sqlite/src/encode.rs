//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, times of day as `HH:MM:SS`,
//! label maps as compact JSON. UUIDs are stored as hyphenated lowercase
//! strings.

use chrono::{DateTime, NaiveTime, Utc};
use rollcall_core::{
  device::Device,
  model::{AssignmentStatus, FaceModel, LabelMap, ModelAssignment},
  schedule::{DayOfWeek, ScheduleEntry},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(e.to_string()))
}

// ─── NaiveTime ───────────────────────────────────────────────────────────────

pub fn encode_time(t: NaiveTime) -> String { t.format("%H:%M:%S").to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M:%S")
    .map_err(|e| Error::Decode(format!("bad time {s:?}: {e}")))
}

// ─── DayOfWeek ───────────────────────────────────────────────────────────────

pub fn encode_day(d: DayOfWeek) -> &'static str { d.as_str() }

pub fn decode_day(s: &str) -> Result<DayOfWeek> {
  DayOfWeek::parse(s).ok_or_else(|| Error::Decode(format!("unknown day: {s:?}")))
}

// ─── LabelMap ────────────────────────────────────────────────────────────────

pub fn encode_label_map(map: &LabelMap) -> Result<String> {
  Ok(serde_json::to_string(map)?)
}

pub fn decode_label_map(s: &str) -> Result<LabelMap> {
  Ok(serde_json::from_str(s)?)
}

// ─── AssignmentStatus ────────────────────────────────────────────────────────

pub fn encode_status(s: AssignmentStatus) -> &'static str {
  match s {
    AssignmentStatus::Pending    => "pending",
    AssignmentStatus::Downloaded => "downloaded",
  }
}

pub fn decode_status(s: &str) -> Result<AssignmentStatus> {
  match s {
    "pending"    => Ok(AssignmentStatus::Pending),
    "downloaded" => Ok(AssignmentStatus::Downloaded),
    other        => Err(Error::Decode(format!("unknown status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `face_models` row.
pub struct RawModel {
  pub model_id:              String,
  pub course_id:             i64,
  pub version:               i64,
  pub artifact_path:         String,
  pub label_map:             String,
  pub artifact_digest:       String,
  pub created_at:            String,
  pub last_enrollment_count: i64,
}

impl RawModel {
  pub fn into_model(self) -> Result<FaceModel> {
    Ok(FaceModel {
      model_id:              decode_uuid(&self.model_id)?,
      course_id:             self.course_id,
      version:               self.version as u32,
      artifact_path:         self.artifact_path,
      label_map:             decode_label_map(&self.label_map)?,
      artifact_digest:       self.artifact_digest,
      created_at:            decode_dt(&self.created_at)?,
      last_enrollment_count: self.last_enrollment_count as u32,
    })
  }
}

/// Raw strings read directly from a `devices` row.
pub struct RawDevice {
  pub device_id: String,
  pub name:      String,
  pub room:      String,
  pub last_seen: Option<String>,
}

impl RawDevice {
  pub fn into_device(self) -> Result<Device> {
    Ok(Device {
      device_id: decode_uuid(&self.device_id)?,
      name:      self.name,
      room:      self.room,
      last_seen: self.last_seen.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from an `assignments` row.
pub struct RawAssignment {
  pub assignment_id: String,
  pub device_id:     String,
  pub model_id:      String,
  pub status:        String,
  pub created_at:    String,
  pub downloaded_at: Option<String>,
}

impl RawAssignment {
  pub fn into_assignment(self) -> Result<ModelAssignment> {
    Ok(ModelAssignment {
      assignment_id: decode_uuid(&self.assignment_id)?,
      device_id:     decode_uuid(&self.device_id)?,
      model_id:      decode_uuid(&self.model_id)?,
      status:        decode_status(&self.status)?,
      created_at:    decode_dt(&self.created_at)?,
      downloaded_at: self.downloaded_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from a `schedule_entries` row.
pub struct RawScheduleEntry {
  pub entry_id:    i64,
  pub course_id:   i64,
  pub room:        String,
  pub day_of_week: String,
  pub start_time:  String,
  pub end_time:    String,
}

impl RawScheduleEntry {
  pub fn into_entry(self) -> Result<ScheduleEntry> {
    Ok(ScheduleEntry {
      entry_id:    self.entry_id,
      course_id:   self.course_id,
      room:        self.room,
      day_of_week: decode_day(&self.day_of_week)?,
      start_time:  decode_time(&self.start_time)?,
      end_time:    decode_time(&self.end_time)?,
    })
  }
}
