//! Cache-health monitor.
//!
//! A lightweight observer that measures what the agent itself grows on
//! disk — the model cache — and warns when it crosses the configured
//! threshold. It never mutates cache state; eviction belongs to the cache
//! manager.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use tokio::sync::watch;
use tracing::{debug, warn};

/// A point-in-time measurement of the cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUsage {
  pub bytes:     u64,
  pub artifacts: usize,
}

impl CacheUsage {
  pub fn exceeds(&self, warn_bytes: u64) -> bool {
    self.bytes > warn_bytes
  }
}

/// Walk the cache directory, summing file sizes and counting artifacts.
pub fn measure(root: &Path) -> std::io::Result<CacheUsage> {
  let mut usage = CacheUsage { bytes: 0, artifacts: 0 };
  let mut stack = vec![root.to_path_buf()];

  while let Some(dir) = stack.pop() {
    let entries = match std::fs::read_dir(&dir) {
      Ok(entries) => entries,
      // The root may not exist before the first download.
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
      Err(e) => return Err(e),
    };
    for entry in entries {
      let entry = entry?;
      let meta = entry.metadata()?;
      if meta.is_dir() {
        stack.push(entry.path());
      } else {
        usage.bytes += meta.len();
        if entry.file_name() == "model.bin" {
          usage.artifacts += 1;
        }
      }
    }
  }
  Ok(usage)
}

/// Periodic health loop. Runs until the shutdown flag flips.
pub async fn run(
  cache_root: PathBuf,
  warn_bytes: u64,
  interval: Duration,
  mut shutdown: watch::Receiver<bool>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = ticker.tick() => {}
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          return;
        }
      }
    }

    match measure(&cache_root) {
      Ok(usage) if usage.exceeds(warn_bytes) => {
        warn!(
          bytes = usage.bytes,
          artifacts = usage.artifacts,
          warn_bytes,
          "model cache exceeds size threshold"
        );
      }
      Ok(usage) => {
        debug!(bytes = usage.bytes, artifacts = usage.artifacts, "cache healthy");
      }
      Err(e) => {
        warn!(error = %e, "cache health check failed");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;

  fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("rollcall-health-test-{}", Uuid::new_v4()))
  }

  #[test]
  fn measure_sums_bytes_and_counts_artifacts() {
    let root = temp_root();
    std::fs::create_dir_all(root.join("course_5/v1")).unwrap();
    std::fs::create_dir_all(root.join("course_5/v2")).unwrap();
    std::fs::write(root.join("course_5/v1/model.bin"), b"12345").unwrap();
    std::fs::write(root.join("course_5/v1/labels.json"), b"{}").unwrap();
    std::fs::write(root.join("course_5/v2/model.bin"), b"123").unwrap();

    let usage = measure(&root).unwrap();
    assert_eq!(usage.artifacts, 2);
    assert_eq!(usage.bytes, 10);
  }

  #[test]
  fn missing_root_measures_empty() {
    let usage = measure(&temp_root()).unwrap();
    assert_eq!(usage, CacheUsage { bytes: 0, artifacts: 0 });
  }

  #[test]
  fn exceeds_compares_against_threshold() {
    let usage = CacheUsage { bytes: 100, artifacts: 1 };
    assert!(usage.exceeds(99));
    assert!(!usage.exceeds(100));
  }
}
