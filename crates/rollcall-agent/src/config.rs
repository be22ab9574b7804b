//! Agent configuration, read from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
  /// Base URL of the orchestrator (e.g. `http://orchestrator:8800`).
  pub server_url: String,
  pub username:   String,
  pub password:   String,

  /// Stable name this device registers under.
  pub device_name: String,
  /// The room this device is mounted in.
  pub room:        String,

  #[serde(default = "default_cache_dir")]
  pub cache_dir: PathBuf,

  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs:   u64,
  #[serde(default = "default_health_interval_secs")]
  pub health_interval_secs: u64,
  #[serde(default = "default_http_timeout_secs")]
  pub http_timeout_secs:    u64,

  /// Cached versions to keep per course beyond the active one.
  #[serde(default = "default_keep_versions")]
  pub keep_versions: usize,

  /// Cache size above which the health monitor starts warning.
  #[serde(default = "default_cache_warn_bytes")]
  pub cache_warn_bytes: u64,
}

fn default_cache_dir() -> PathBuf { PathBuf::from("models") }

fn default_poll_interval_secs() -> u64 { 30 }

fn default_health_interval_secs() -> u64 { 60 }

fn default_http_timeout_secs() -> u64 { 10 }

fn default_keep_versions() -> usize { 3 }

fn default_cache_warn_bytes() -> u64 { 512 * 1024 * 1024 }

impl AgentConfig {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")
  }
}
