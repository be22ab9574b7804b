//! Schedule monitor — maps wall-clock time to the course that should be
//! active in this device's room.
//!
//! A small two-state machine: `Idle` or `Active(course)`. Leaving every
//! window transitions to `Idle` but deliberately does not unload the
//! last-activated model; re-observing the same course is a no-op so an
//! unchanged schedule never triggers redundant fetches.

use chrono::NaiveTime;
use rollcall_core::{
  model::CourseId,
  schedule::{DayOfWeek, ScheduleEntry, active_entry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
  Idle,
  Active(CourseId),
}

/// What a tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// No state change; nothing to do.
  None,
  /// Left the last window. The cached model stays loaded.
  ToIdle,
  /// Entered a window for a different course; the cache manager must make
  /// its current model active.
  ToCourse(CourseId),
}

#[derive(Debug)]
pub struct ScheduleMonitor {
  state: MonitorState,
}

impl ScheduleMonitor {
  pub fn new() -> Self {
    Self { state: MonitorState::Idle }
  }

  pub fn state(&self) -> MonitorState {
    self.state
  }

  /// Feed one tick's observation through the state machine.
  pub fn observe(
    &mut self,
    entries: &[ScheduleEntry],
    day: DayOfWeek,
    at: NaiveTime,
  ) -> Transition {
    match active_entry(entries, day, at) {
      None => {
        if matches!(self.state, MonitorState::Active(_)) {
          self.state = MonitorState::Idle;
          Transition::ToIdle
        } else {
          Transition::None
        }
      }
      Some(entry) => {
        if self.state == MonitorState::Active(entry.course_id) {
          Transition::None
        } else {
          self.state = MonitorState::Active(entry.course_id);
          Transition::ToCourse(entry.course_id)
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
  }

  fn entry(id: i64, course: CourseId, start: NaiveTime, end: NaiveTime) -> ScheduleEntry {
    ScheduleEntry {
      entry_id:    id,
      course_id:   course,
      room:        "B-204".into(),
      day_of_week: DayOfWeek::Monday,
      start_time:  start,
      end_time:    end,
    }
  }

  #[test]
  fn enters_active_when_a_window_opens() {
    let mut monitor = ScheduleMonitor::new();
    let entries = vec![entry(1, 5, t(9, 0), t(10, 30))];

    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(9, 15)),
      Transition::ToCourse(5)
    );
    assert_eq!(monitor.state(), MonitorState::Active(5));
  }

  #[test]
  fn same_course_on_the_next_tick_is_a_noop() {
    let mut monitor = ScheduleMonitor::new();
    let entries = vec![entry(1, 5, t(9, 0), t(10, 30))];

    monitor.observe(&entries, DayOfWeek::Monday, t(9, 15));
    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(9, 45)),
      Transition::None
    );
  }

  #[test]
  fn switches_course_when_the_next_window_opens() {
    let mut monitor = ScheduleMonitor::new();
    let entries = vec![
      entry(1, 5, t(9, 0), t(10, 30)),
      entry(2, 6, t(11, 0), t(12, 30)),
    ];

    monitor.observe(&entries, DayOfWeek::Monday, t(9, 15));
    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(11, 5)),
      Transition::ToCourse(6)
    );
  }

  #[test]
  fn leaving_every_window_goes_idle_once() {
    let mut monitor = ScheduleMonitor::new();
    let entries = vec![entry(1, 5, t(9, 0), t(10, 30))];

    monitor.observe(&entries, DayOfWeek::Monday, t(9, 15));
    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(14, 0)),
      Transition::ToIdle
    );
    // Staying idle produces no further transitions.
    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(15, 0)),
      Transition::None
    );
  }

  #[test]
  fn idle_with_no_schedule_stays_idle() {
    let mut monitor = ScheduleMonitor::new();
    assert_eq!(
      monitor.observe(&[], DayOfWeek::Monday, t(14, 0)),
      Transition::None
    );
    assert_eq!(monitor.state(), MonitorState::Idle);
  }

  #[test]
  fn overlapping_windows_resolve_to_the_lowest_entry_id() {
    let mut monitor = ScheduleMonitor::new();
    let entries = vec![
      entry(9, 5, t(9, 0), t(11, 0)),
      entry(2, 6, t(10, 0), t(12, 0)),
    ];

    assert_eq!(
      monitor.observe(&entries, DayOfWeek::Monday, t(10, 30)),
      Transition::ToCourse(6)
    );
  }
}
