//! The daily retrain cron and its config watcher.
//!
//! The retrain hour/minute lives in the roster's service-config document and
//! is polled on a short fixed interval. The watcher diffs each resolved
//! value against the last one it applied and only then replaces the
//! installed job — an unchanged document never disturbs a sleeping timer.

use std::{sync::Arc, time::Duration};

use chrono::NaiveDateTime;
use rollcall_core::{
  capability::{ClassifierTrainer, FeatureExtractor},
  registry::ModelRegistry,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
  roster::Roster,
  train::Orchestrator,
};

/// Config keys the watcher reads from the service-config document.
const HOUR_KEY: &str = "train_hour";
const MINUTE_KEY: &str = "train_minute";

// ─── Cron time ───────────────────────────────────────────────────────────────

/// A daily wall-clock firing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronTime {
  hour:   u32,
  minute: u32,
}

impl CronTime {
  pub fn new(hour: u32, minute: u32) -> Option<Self> {
    (hour < 24 && minute < 60).then_some(Self { hour, minute })
  }

  pub fn hour(&self) -> u32 {
    self.hour
  }

  pub fn minute(&self) -> u32 {
    self.minute
  }

  /// Resolve the firing time from a service-config document, falling back
  /// to `default` when keys are absent or unparseable.
  pub fn from_config(
    map: &std::collections::HashMap<String, String>,
    default: CronTime,
  ) -> CronTime {
    let hour = map
      .get(HOUR_KEY)
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(default.hour);
    let minute = map
      .get(MINUTE_KEY)
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(default.minute);
    CronTime::new(hour, minute).unwrap_or(default)
  }

  /// The next instant this time occurs strictly after `now`.
  pub fn next_occurrence(&self, now: NaiveDateTime) -> NaiveDateTime {
    let today = now
      .date()
      .and_hms_opt(self.hour, self.minute, 0)
      .expect("cron time validated at construction");
    if today > now {
      today
    } else {
      now
        .date()
        .succ_opt()
        .expect("date out of range")
        .and_hms_opt(self.hour, self.minute, 0)
        .expect("cron time validated at construction")
    }
  }
}

// ─── Watcher ─────────────────────────────────────────────────────────────────

/// Poll the service-config document every `poll_interval` and publish the
/// resolved firing time whenever it differs from the last applied value.
pub async fn watch_config<S>(
  roster: Arc<S>,
  default: CronTime,
  poll_interval: Duration,
  tx: watch::Sender<CronTime>,
) where
  S: Roster,
{
  let mut applied = *tx.borrow();
  let mut ticker = tokio::time::interval(poll_interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    ticker.tick().await;

    let resolved = match roster.service_config().await {
      Ok(map) => CronTime::from_config(&map, default),
      Err(e) => {
        // Transient; keep the installed job and try again next poll.
        debug!(error = %e, "service-config poll failed");
        continue;
      }
    };

    if resolved != applied {
      info!(
        hour = resolved.hour(),
        minute = resolved.minute(),
        "retrain time changed, reinstalling job"
      );
      applied = resolved;
      if tx.send(resolved).is_err() {
        return;
      }
    }
  }
}

/// Sleep until the installed firing time, run a sweep, repeat. A published
/// config change interrupts the sleep and re-arms the timer at the new
/// time; the sweep itself is never interrupted.
pub async fn run_retrain_cron<R, S, X, T>(
  orch: Arc<Orchestrator<R, S, X, T>>,
  mut rx: watch::Receiver<CronTime>,
) where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
  S: Roster + 'static,
  X: FeatureExtractor + 'static,
  T: ClassifierTrainer + 'static,
{
  loop {
    let installed = *rx.borrow_and_update();
    let now = chrono::Local::now().naive_local();
    let next = installed.next_occurrence(now);
    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
    info!(at = %next, "next retrain sweep scheduled");

    tokio::select! {
      _ = tokio::time::sleep(delay) => {
        orch.sweep().await;
      }
      changed = rx.changed() => {
        if changed.is_err() {
          // Sender gone: the process is shutting down.
          return;
        }
        // Loop re-arms the timer with the new firing time.
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  use chrono::NaiveDate;

  fn at(h: u32, m: u32) -> CronTime {
    CronTime::new(h, m).unwrap()
  }

  fn dt(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 10)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  #[test]
  fn fires_later_today_when_still_ahead() {
    let next = at(2, 30).next_occurrence(dt(1, 0));
    assert_eq!(next, dt(2, 30));
  }

  #[test]
  fn fires_tomorrow_when_already_past() {
    let next = at(2, 30).next_occurrence(dt(14, 0));
    assert_eq!(
      next,
      NaiveDate::from_ymd_opt(2025, 3, 11)
        .unwrap()
        .and_hms_opt(2, 30, 0)
        .unwrap()
    );
  }

  #[test]
  fn exact_firing_minute_rolls_to_tomorrow() {
    // Strictly-after semantics keep a just-fired job from firing twice.
    let next = at(2, 30).next_occurrence(dt(2, 30));
    assert_eq!(next.date(), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
  }

  #[test]
  fn invalid_hour_rejected() {
    assert!(CronTime::new(24, 0).is_none());
    assert!(CronTime::new(3, 60).is_none());
  }

  #[test]
  fn config_overrides_default() {
    let mut map = HashMap::new();
    map.insert("train_hour".to_string(), "4".to_string());
    map.insert("train_minute".to_string(), "45".to_string());
    assert_eq!(CronTime::from_config(&map, at(2, 0)), at(4, 45));
  }

  #[test]
  fn absent_keys_fall_back_to_default() {
    assert_eq!(CronTime::from_config(&HashMap::new(), at(2, 0)), at(2, 0));
  }

  #[test]
  fn unparseable_or_out_of_range_values_fall_back() {
    let mut map = HashMap::new();
    map.insert("train_hour".to_string(), "late".to_string());
    assert_eq!(CronTime::from_config(&map, at(2, 0)), at(2, 0));

    let mut map = HashMap::new();
    map.insert("train_hour".to_string(), "99".to_string());
    assert_eq!(CronTime::from_config(&map, at(2, 0)), at(2, 0));
  }
}
