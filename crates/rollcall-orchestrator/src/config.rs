//! Runtime orchestrator configuration, deserialised from `config.toml` with
//! `ROLLCALL_`-prefixed environment overrides layered on top.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct OrchestratorConfig {
  pub host: String,
  pub port: u16,

  /// SQLite registry file.
  pub db_path:      PathBuf,
  /// Root directory for versioned model artifacts.
  pub artifact_dir: PathBuf,

  pub auth_username:      String,
  /// PHC string; generate with `orchestrator --hash-password`.
  pub auth_password_hash: String,
  #[serde(default = "default_token_ttl_secs")]
  pub token_ttl_secs:     u64,

  /// Base URL of the external roster web application.
  pub roster_url:      String,
  pub roster_username: String,
  pub roster_password: String,

  /// Base URL of the external training service.
  pub training_service_url: String,

  #[serde(default = "default_http_timeout_secs")]
  pub http_timeout_secs: u64,

  /// Fallback retrain time, used until the roster's service-config document
  /// provides one.
  #[serde(default = "default_train_hour")]
  pub train_hour:   u32,
  #[serde(default = "default_train_minute")]
  pub train_minute: u32,

  /// How often the service-config document is polled for a changed retrain
  /// time.
  #[serde(default = "default_config_poll_secs")]
  pub config_poll_secs: u64,

  #[serde(default = "default_max_parallel_trainings")]
  pub max_parallel_trainings: usize,
}

fn default_token_ttl_secs() -> u64 { 900 }

fn default_http_timeout_secs() -> u64 { 30 }

fn default_train_hour() -> u32 { 2 }

fn default_train_minute() -> u32 { 0 }

fn default_config_poll_secs() -> u64 { 60 }

fn default_max_parallel_trainings() -> usize { 2 }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_config_fills_defaults() {
    let cfg: OrchestratorConfig = toml_from_str(
      r#"
        host = "127.0.0.1"
        port = 8800
        db_path = "/var/lib/rollcall/registry.db"
        artifact_dir = "/var/lib/rollcall/artifacts"
        auth_username = "fleet"
        auth_password_hash = "$argon2id$v=19$stub"
        roster_url = "http://roster.internal:8000"
        roster_username = "service"
        roster_password = "secret"
        training_service_url = "http://trainer.internal:9000"
      "#,
    );

    assert_eq!(cfg.token_ttl_secs, 900);
    assert_eq!(cfg.train_hour, 2);
    assert_eq!(cfg.train_minute, 0);
    assert_eq!(cfg.config_poll_secs, 60);
    assert_eq!(cfg.max_parallel_trainings, 2);
  }

  fn toml_from_str(s: &str) -> OrchestratorConfig {
    config::Config::builder()
      .add_source(config::File::from_str(s, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }
}
