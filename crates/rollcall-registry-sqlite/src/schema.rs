//! SQL schema for the Rollcall SQLite registry.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Model rows are immutable once committed. 'Current' per course is the row
-- with the highest version; no flag column exists to drift out of sync.
CREATE TABLE IF NOT EXISTS face_models (
    model_id              TEXT PRIMARY KEY,
    course_id             INTEGER NOT NULL,
    version               INTEGER NOT NULL,
    artifact_path         TEXT NOT NULL,
    label_map             TEXT NOT NULL,      -- JSON: output index -> member id
    artifact_digest       TEXT NOT NULL,      -- sha256 hex of the artifact bytes
    created_at            TEXT NOT NULL,      -- ISO 8601 UTC
    last_enrollment_count INTEGER NOT NULL,
    UNIQUE (course_id, version),
    CHECK  (version >= 1)
);

CREATE TABLE IF NOT EXISTS devices (
    device_id TEXT PRIMARY KEY,
    name      TEXT NOT NULL UNIQUE,           -- stable agent-chosen identity
    room      TEXT NOT NULL,
    last_seen TEXT
);

-- Per-course version a device last acknowledged downloading.
CREATE TABLE IF NOT EXISTS device_versions (
    device_id  TEXT NOT NULL REFERENCES devices(device_id),
    course_id  INTEGER NOT NULL,
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (device_id, course_id)
);

-- Status only ever moves pending -> downloaded.
CREATE TABLE IF NOT EXISTS assignments (
    assignment_id TEXT PRIMARY KEY,
    device_id     TEXT NOT NULL REFERENCES devices(device_id),
    model_id      TEXT NOT NULL REFERENCES face_models(model_id),
    status        TEXT NOT NULL DEFAULT 'pending',
    created_at    TEXT NOT NULL,
    downloaded_at TEXT,
    UNIQUE (device_id, model_id)
);

-- Read-only mirror of the roster's schedule feed; replaced wholesale on
-- each refresh.
CREATE TABLE IF NOT EXISTS schedule_entries (
    entry_id    INTEGER PRIMARY KEY,          -- roster-assigned; tie-break key
    course_id   INTEGER NOT NULL,
    room        TEXT NOT NULL,
    day_of_week TEXT NOT NULL,                -- 'Monday' .. 'Sunday'
    start_time  TEXT NOT NULL,                -- 'HH:MM:SS'
    end_time    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS face_models_course_idx   ON face_models(course_id);
CREATE INDEX IF NOT EXISTS assignments_device_idx   ON assignments(device_id, status);
CREATE INDEX IF NOT EXISTS schedule_room_day_idx    ON schedule_entries(room, day_of_week);
CREATE INDEX IF NOT EXISTS schedule_course_idx      ON schedule_entries(course_id);

PRAGMA user_version = 1;
";
