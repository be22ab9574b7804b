//! The supervised device loop: schedule tick, model sync, health monitor,
//! and graceful shutdown between ticks.

use std::time::Duration;

use anyhow::Context as _;
use chrono::{Datelike as _, Local};
use rollcall_core::{model::CourseId, schedule::DayOfWeek};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  cache::{EnsureOutcome, ModelCache, OpaqueArtifactLoader},
  client::{ClientConfig, RegistryClient},
  config::AgentConfig,
  health,
  monitor::{MonitorState, ScheduleMonitor, Transition},
};

pub struct DeviceLoop {
  config:    AgentConfig,
  client:    RegistryClient,
  cache:     ModelCache,
  monitor:   ScheduleMonitor,
  loader:    OpaqueArtifactLoader,
  device_id: Uuid,
}

/// Run the agent until the shutdown flag flips. Exits between ticks, never
/// mid-activation.
pub async fn run(config: AgentConfig, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
  let client = RegistryClient::new(ClientConfig {
    base_url: config.server_url.clone(),
    username: config.username.clone(),
    password: config.password.clone(),
    timeout:  Duration::from_secs(config.http_timeout_secs),
  })
  .context("building registry client")?;

  let cache = ModelCache::open(&config.cache_dir).context("opening model cache")?;

  // Register (or relocate) this device; keep retrying through outages so a
  // cold boot without connectivity still converges.
  let poll_interval = Duration::from_secs(config.poll_interval_secs);
  let device_id = loop {
    match client.register_device(&config.device_name, &config.room).await {
      Ok(device) => {
        info!(device_id = %device.device_id, room = %device.room, "device registered");
        break device.device_id;
      }
      Err(e) => {
        warn!(error = %e, "device registration failed, retrying");
        tokio::select! {
          _ = tokio::time::sleep(poll_interval) => {}
          changed = shutdown.changed() => {
            if changed.is_err() || *shutdown.borrow() {
              return Ok(());
            }
          }
        }
      }
    }
  };

  // The health monitor observes and logs; it never touches cache state.
  let mut health_handle = tokio::spawn(health::run(
    config.cache_dir.clone(),
    config.cache_warn_bytes,
    Duration::from_secs(config.health_interval_secs),
    shutdown.clone(),
  ));

  let mut device = DeviceLoop {
    config,
    client,
    cache,
    monitor: ScheduleMonitor::new(),
    loader: OpaqueArtifactLoader,
    device_id,
  };

  let mut ticker = tokio::time::interval(poll_interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        // Transient failures skip this cycle; the next tick retries.
        if let Err(e) = device.tick().await {
          warn!(error = %e, "tick failed, retrying next poll");
        }
      }
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          break;
        }
      }
    }
  }

  // Bounded teardown: give the health task a moment to notice the flag,
  // then abort it.
  info!("shutting down, releasing resources");
  if tokio::time::timeout(Duration::from_secs(5), &mut health_handle)
    .await
    .is_err()
  {
    debug!("health monitor did not stop in time, aborting");
    health_handle.abort();
  }
  Ok(())
}

impl DeviceLoop {
  /// One schedule-monitor tick.
  async fn tick(&mut self) -> anyhow::Result<()> {
    let now  = Local::now();
    let day  = DayOfWeek::from(now.weekday());
    let time = now.time();

    let entries = self.client.schedule(&self.config.room, day).await?;

    match self.monitor.observe(&entries, day, time) {
      Transition::ToCourse(course_id) => {
        info!(course_id, "class window opened");
        self.sync_course(course_id).await?;
      }
      Transition::ToIdle => {
        // The last-activated model stays loaded for walk-in scans.
        info!("no active schedule");
      }
      Transition::None => {
        // While a class is running, pending assignments signal that a new
        // version was published mid-window.
        if let MonitorState::Active(course_id) = self.monitor.state() {
          let pending = self.client.pending_assignments(self.device_id).await?;
          if !pending.is_empty() {
            debug!(count = pending.len(), "pending assignments, re-syncing");
            self.sync_course(course_id).await?;
          }
        }
      }
    }
    Ok(())
  }

  /// Bring the active model for `course_id` in line with the registry, then
  /// acknowledge and evict.
  async fn sync_course(&mut self, course_id: CourseId) -> anyhow::Result<()> {
    let outcome = self
      .cache
      .ensure_active(&self.client, &self.loader, course_id)
      .await?;

    let model_id = match outcome {
      EnsureOutcome::NoModelPublished => {
        info!(course_id, "no model published for course yet");
        return Ok(());
      }
      EnsureOutcome::AlreadyCurrent { version, model_id } => {
        debug!(course_id, version, "model already current");
        model_id
      }
      EnsureOutcome::Activated { version, model_id } => {
        info!(course_id, version, "model downloaded and activated");
        model_id
      }
    };

    // Idempotent; also clears any assignment a lost ack left pending.
    match self.client.ack_downloaded(self.device_id, model_id).await {
      Ok(true)  => debug!(course_id, "download acknowledged"),
      Ok(false) => {}
      Err(e)    => warn!(course_id, error = %e, "download ack failed"),
    }

    let removed = self.cache.cleanup_old(course_id, self.config.keep_versions)?;
    if !removed.is_empty() {
      debug!(course_id, ?removed, "evicted old cached versions");
    }
    Ok(())
  }
}
