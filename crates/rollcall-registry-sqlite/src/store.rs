//! [`SqliteRegistry`] — the SQLite implementation of [`ModelRegistry`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use rollcall_core::{
  device::Device,
  model::{AssignmentStatus, CourseId, FaceModel, ModelAssignment, NewModel},
  registry::ModelRegistry,
  schedule::{DayOfWeek, ScheduleEntry},
};

use crate::{
  Error, Result,
  encode::{
    RawAssignment, RawDevice, RawModel, RawScheduleEntry, encode_day,
    encode_dt, encode_label_map, encode_status, encode_time, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Registry ────────────────────────────────────────────────────────────────

/// A Rollcall model registry backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRegistry {
  conn: tokio_rusqlite::Connection,
}

impl SqliteRegistry {
  /// Open (or create) a registry at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let registry = Self { conn };
    registry.init_schema().await?;
    Ok(registry)
  }

  /// Open an in-memory registry — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let registry = Self { conn };
    registry.init_schema().await?;
    Ok(registry)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn model_by_query(
    &self,
    sql: &'static str,
    params: Vec<Box<dyn rusqlite::ToSql + Send>>,
  ) -> Result<Option<FaceModel>> {
    let raw: Option<RawModel> = self
      .conn
      .call(move |conn| {
        let refs: Vec<&dyn rusqlite::ToSql> =
          params.iter().map(|p| p.as_ref() as &dyn rusqlite::ToSql).collect();
        Ok(
          conn
            .query_row(sql, refs.as_slice(), |row| {
              Ok(RawModel {
                model_id:              row.get(0)?,
                course_id:             row.get(1)?,
                version:               row.get(2)?,
                artifact_path:         row.get(3)?,
                label_map:             row.get(4)?,
                artifact_digest:       row.get(5)?,
                created_at:            row.get(6)?,
                last_enrollment_count: row.get(7)?,
              })
            })
            .optional()?,
        )
      })
      .await?;

    raw.map(RawModel::into_model).transpose()
  }
}

// ─── ModelRegistry impl ──────────────────────────────────────────────────────

impl ModelRegistry for SqliteRegistry {
  type Error = Error;

  // ── Models ────────────────────────────────────────────────────────────────

  async fn get_current_model(&self, course_id: CourseId) -> Result<Option<FaceModel>> {
    self
      .model_by_query(
        "SELECT model_id, course_id, version, artifact_path, label_map,
                artifact_digest, created_at, last_enrollment_count
         FROM face_models WHERE course_id = ?1
         ORDER BY version DESC LIMIT 1",
        vec![Box::new(course_id)],
      )
      .await
  }

  async fn get_model(&self, course_id: CourseId, version: u32) -> Result<Option<FaceModel>> {
    self
      .model_by_query(
        "SELECT model_id, course_id, version, artifact_path, label_map,
                artifact_digest, created_at, last_enrollment_count
         FROM face_models WHERE course_id = ?1 AND version = ?2",
        vec![Box::new(course_id), Box::new(version as i64)],
      )
      .await
  }

  async fn get_model_by_id(&self, model_id: Uuid) -> Result<Option<FaceModel>> {
    self
      .model_by_query(
        "SELECT model_id, course_id, version, artifact_path, label_map,
                artifact_digest, created_at, last_enrollment_count
         FROM face_models WHERE model_id = ?1",
        vec![Box::new(encode_uuid(model_id))],
      )
      .await
  }

  async fn upsert_model(
    &self,
    course_id: CourseId,
    input: NewModel,
    expected_version: Option<u32>,
  ) -> Result<FaceModel> {
    let model_id   = Uuid::new_v4();
    let created_at = Utc::now();

    let id_str        = encode_uuid(model_id);
    let at_str        = encode_dt(created_at);
    let label_map_str = encode_label_map(&input.label_map)?;
    let NewModel { artifact_path, artifact_digest, enrollment_count, .. } = input;

    // The version check and the insert run inside one transaction so two
    // writers can never both commit the same next version.
    let outcome: std::result::Result<RawModel, Option<u32>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let found: Option<i64> = tx.query_row(
          "SELECT MAX(version) FROM face_models WHERE course_id = ?1",
          rusqlite::params![course_id],
          |r| r.get(0),
        )?;
        let found = found.map(|v| v as u32);

        if found != expected_version {
          return Ok(Err(found));
        }
        let version = i64::from(found.unwrap_or(0) + 1);

        tx.execute(
          "INSERT INTO face_models (
             model_id, course_id, version, artifact_path, label_map,
             artifact_digest, created_at, last_enrollment_count
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            course_id,
            version,
            artifact_path,
            label_map_str,
            artifact_digest,
            at_str,
            i64::from(enrollment_count),
          ],
        )?;
        tx.commit()?;

        Ok(Ok(RawModel {
          model_id:              id_str,
          course_id,
          version,
          artifact_path,
          label_map:             label_map_str,
          artifact_digest,
          created_at:            at_str,
          last_enrollment_count: i64::from(enrollment_count),
        }))
      })
      .await?;

    match outcome {
      Ok(raw)    => raw.into_model(),
      Err(found) => Err(Error::VersionConflict {
        course_id,
        expected: expected_version,
        found,
      }),
    }
  }

  // ── Devices ───────────────────────────────────────────────────────────────

  async fn register_device(&self, name: &str, room: &str) -> Result<Device> {
    let id_str   = encode_uuid(Uuid::new_v4());
    let name_own = name.to_owned();
    let room_own = room.to_owned();

    let raw: RawDevice = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO devices (device_id, name, room, last_seen)
           VALUES (?1, ?2, ?3, NULL)
           ON CONFLICT(name) DO UPDATE SET room = excluded.room",
          rusqlite::params![id_str, name_own, room_own],
        )?;

        conn.query_row(
          "SELECT device_id, name, room, last_seen FROM devices WHERE name = ?1",
          rusqlite::params![name_own],
          |row| {
            Ok(RawDevice {
              device_id: row.get(0)?,
              name:      row.get(1)?,
              room:      row.get(2)?,
              last_seen: row.get(3)?,
            })
          },
        )
        .map_err(Into::into)
      })
      .await?;

    raw.into_device()
  }

  async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>> {
    let id_str = encode_uuid(device_id);

    let raw: Option<RawDevice> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT device_id, name, room, last_seen FROM devices WHERE device_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawDevice {
                  device_id: row.get(0)?,
                  name:      row.get(1)?,
                  room:      row.get(2)?,
                  last_seen: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDevice::into_device).transpose()
  }

  async fn list_devices(&self) -> Result<Vec<Device>> {
    let raws: Vec<RawDevice> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT device_id, name, room, last_seen FROM devices ORDER BY name")?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawDevice {
              device_id: row.get(0)?,
              name:      row.get(1)?,
              room:      row.get(2)?,
              last_seen: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDevice::into_device).collect()
  }

  async fn device_versions(&self, device_id: Uuid) -> Result<BTreeMap<CourseId, u32>> {
    let id_str = encode_uuid(device_id);

    let rows: Vec<(i64, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare("SELECT course_id, version FROM device_versions WHERE device_id = ?1")?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(rows.into_iter().map(|(c, v)| (c, v as u32)).collect())
  }

  // ── Relation traversal ────────────────────────────────────────────────────

  async fn rooms_for_course(&self, course_id: CourseId) -> Result<Vec<String>> {
    let rooms = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT room FROM schedule_entries WHERE course_id = ?1 ORDER BY room",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![course_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rooms)
  }

  async fn devices_in_room(&self, room: &str) -> Result<Vec<Device>> {
    let room_own = room.to_owned();

    let raws: Vec<RawDevice> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT device_id, name, room, last_seen FROM devices WHERE room = ?1 ORDER BY name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![room_own], |row| {
            Ok(RawDevice {
              device_id: row.get(0)?,
              name:      row.get(1)?,
              room:      row.get(2)?,
              last_seen: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDevice::into_device).collect()
  }

  async fn list_courses(&self) -> Result<Vec<CourseId>> {
    let courses = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT DISTINCT course_id FROM schedule_entries ORDER BY course_id")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(courses)
  }

  // ── Schedule mirror ───────────────────────────────────────────────────────

  async fn replace_schedule(&self, entries: Vec<ScheduleEntry>) -> Result<()> {
    let rows: Vec<RawScheduleEntry> = entries
      .into_iter()
      .map(|e| RawScheduleEntry {
        entry_id:    e.entry_id,
        course_id:   e.course_id,
        room:        e.room,
        day_of_week: encode_day(e.day_of_week).to_owned(),
        start_time:  encode_time(e.start_time),
        end_time:    encode_time(e.end_time),
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM schedule_entries", [])?;
        for row in &rows {
          tx.execute(
            "INSERT INTO schedule_entries
               (entry_id, course_id, room, day_of_week, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
              row.entry_id,
              row.course_id,
              row.room,
              row.day_of_week,
              row.start_time,
              row.end_time,
            ],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn schedule_for_room(&self, room: &str, day: DayOfWeek) -> Result<Vec<ScheduleEntry>> {
    let room_own = room.to_owned();
    let day_str  = encode_day(day).to_owned();

    let raws: Vec<RawScheduleEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, course_id, room, day_of_week, start_time, end_time
           FROM schedule_entries
           WHERE room = ?1 AND day_of_week = ?2
           ORDER BY entry_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![room_own, day_str], |row| {
            Ok(RawScheduleEntry {
              entry_id:    row.get(0)?,
              course_id:   row.get(1)?,
              room:        row.get(2)?,
              day_of_week: row.get(3)?,
              start_time:  row.get(4)?,
              end_time:    row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScheduleEntry::into_entry).collect()
  }

  // ── Assignments ───────────────────────────────────────────────────────────

  async fn assign_model(&self, device_id: Uuid, model_id: Uuid) -> Result<ModelAssignment> {
    let assignment_id = encode_uuid(Uuid::new_v4());
    let device_str    = encode_uuid(device_id);
    let model_str     = encode_uuid(model_id);
    let at_str        = encode_dt(Utc::now());
    let pending_str   = encode_status(AssignmentStatus::Pending);

    let raw: RawAssignment = self
      .conn
      .call(move |conn| {
        // DO NOTHING keeps an existing pending or downloaded row untouched.
        conn.execute(
          "INSERT INTO assignments
             (assignment_id, device_id, model_id, status, created_at, downloaded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, NULL)
           ON CONFLICT(device_id, model_id) DO NOTHING",
          rusqlite::params![assignment_id, device_str, model_str, pending_str, at_str],
        )?;

        conn.query_row(
          "SELECT assignment_id, device_id, model_id, status, created_at, downloaded_at
           FROM assignments WHERE device_id = ?1 AND model_id = ?2",
          rusqlite::params![device_str, model_str],
          |row| {
            Ok(RawAssignment {
              assignment_id: row.get(0)?,
              device_id:     row.get(1)?,
              model_id:      row.get(2)?,
              status:        row.get(3)?,
              created_at:    row.get(4)?,
              downloaded_at: row.get(5)?,
            })
          },
        )
        .map_err(Into::into)
      })
      .await?;

    raw.into_assignment()
  }

  async fn list_pending_assignments(&self, device_id: Uuid) -> Result<Vec<ModelAssignment>> {
    let device_str = encode_uuid(device_id);

    let raws: Vec<RawAssignment> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT assignment_id, device_id, model_id, status, created_at, downloaded_at
           FROM assignments
           WHERE device_id = ?1 AND status = 'pending'
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![device_str], |row| {
            Ok(RawAssignment {
              assignment_id: row.get(0)?,
              device_id:     row.get(1)?,
              model_id:      row.get(2)?,
              status:        row.get(3)?,
              created_at:    row.get(4)?,
              downloaded_at: row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAssignment::into_assignment).collect()
  }

  async fn mark_downloaded(&self, device_id: Uuid, model_id: Uuid) -> Result<bool> {
    let device_str = encode_uuid(device_id);
    let model_str  = encode_uuid(model_id);
    let now_str    = encode_dt(Utc::now());

    let outcome: std::result::Result<bool, ()> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let model: Option<(i64, i64)> = tx
          .query_row(
            "SELECT course_id, version FROM face_models WHERE model_id = ?1",
            rusqlite::params![model_str],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;
        let Some((course_id, version)) = model else {
          return Ok(Err(()));
        };

        // Only a pending row transitions; a repeated ack changes nothing.
        let transitioned = tx.execute(
          "UPDATE assignments SET status = ?1, downloaded_at = ?2
           WHERE device_id = ?3 AND model_id = ?4 AND status = ?5",
          rusqlite::params![
            encode_status(AssignmentStatus::Downloaded),
            now_str,
            device_str,
            model_str,
            encode_status(AssignmentStatus::Pending),
          ],
        )? > 0;

        tx.execute(
          "UPDATE devices SET last_seen = ?1 WHERE device_id = ?2",
          rusqlite::params![now_str, device_str],
        )?;
        tx.execute(
          "INSERT INTO device_versions (device_id, course_id, version, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(device_id, course_id) DO UPDATE
             SET version = excluded.version, updated_at = excluded.updated_at",
          rusqlite::params![device_str, course_id, version, now_str],
        )?;

        tx.commit()?;
        Ok(Ok(transitioned))
      })
      .await?;

    outcome.map_err(|()| Error::ModelNotFound(model_id))
  }
}
