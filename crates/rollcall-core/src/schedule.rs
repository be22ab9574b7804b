//! Schedule entries and the wall-clock → active-course resolution.
//!
//! The schedule feed is owned by the external roster system and mirrored
//! read-only into the registry. Entries are assumed non-overlapping per
//! room; when that assumption is violated the resolution below still picks
//! a deterministic winner (lowest entry id) rather than erroring.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::CourseId;

// ─── Day of week ─────────────────────────────────────────────────────────────

/// Day of the week as the roster feed spells it ("Monday", "Tuesday", …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayOfWeek {
  Monday,
  Tuesday,
  Wednesday,
  Thursday,
  Friday,
  Saturday,
  Sunday,
}

impl DayOfWeek {
  pub fn as_str(&self) -> &'static str {
    match self {
      DayOfWeek::Monday    => "Monday",
      DayOfWeek::Tuesday   => "Tuesday",
      DayOfWeek::Wednesday => "Wednesday",
      DayOfWeek::Thursday  => "Thursday",
      DayOfWeek::Friday    => "Friday",
      DayOfWeek::Saturday  => "Saturday",
      DayOfWeek::Sunday    => "Sunday",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "Monday"    => Some(DayOfWeek::Monday),
      "Tuesday"   => Some(DayOfWeek::Tuesday),
      "Wednesday" => Some(DayOfWeek::Wednesday),
      "Thursday"  => Some(DayOfWeek::Thursday),
      "Friday"    => Some(DayOfWeek::Friday),
      "Saturday"  => Some(DayOfWeek::Saturday),
      "Sunday"    => Some(DayOfWeek::Sunday),
      _           => None,
    }
  }
}

impl From<Weekday> for DayOfWeek {
  fn from(day: Weekday) -> Self {
    match day {
      Weekday::Mon => DayOfWeek::Monday,
      Weekday::Tue => DayOfWeek::Tuesday,
      Weekday::Wed => DayOfWeek::Wednesday,
      Weekday::Thu => DayOfWeek::Thursday,
      Weekday::Fri => DayOfWeek::Friday,
      Weekday::Sat => DayOfWeek::Saturday,
      Weekday::Sun => DayOfWeek::Sunday,
    }
  }
}

impl std::fmt::Display for DayOfWeek {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A room/day/time window bound to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
  /// Id assigned by the roster system; also the tie-break key.
  pub entry_id:    i64,
  pub course_id:   CourseId,
  pub room:        String,
  pub day_of_week: DayOfWeek,
  pub start_time:  NaiveTime,
  pub end_time:    NaiveTime,
}

impl ScheduleEntry {
  /// Whether `at` falls inside this entry's window on `day`. Both endpoints
  /// are inclusive.
  pub fn covers(&self, day: DayOfWeek, at: NaiveTime) -> bool {
    self.day_of_week == day && self.start_time <= at && at <= self.end_time
  }
}

/// Resolve the entry active at `(day, at)` among `entries`.
///
/// More than one match means the non-overlap precondition was violated
/// upstream; the lowest entry id wins so every observer agrees.
pub fn active_entry(
  entries: &[ScheduleEntry],
  day: DayOfWeek,
  at: NaiveTime,
) -> Option<&ScheduleEntry> {
  entries
    .iter()
    .filter(|e| e.covers(day, at))
    .min_by_key(|e| e.entry_id)
}
