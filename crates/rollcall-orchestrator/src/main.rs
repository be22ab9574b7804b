//! rollcall-orchestrator server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite registry, serves the registry API to edge agents, and runs the
//! retrain cron.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash` in config.toml:
//!
//! ```
//! cargo run -p rollcall-orchestrator --bin orchestrator -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use rollcall_api::{AppState, AuthConfig, TokenStore};
use rollcall_orchestrator::{
  OrchestratorConfig,
  artifacts::ArtifactStore,
  capability::TrainingService,
  cron::{self, CronTime},
  roster::{HttpRoster, RosterConfig},
  train::Orchestrator,
};
use rollcall_registry_sqlite::SqliteRegistry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Rollcall training orchestrator")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ROLLCALL"))
    .build()
    .context("failed to read config file")?;

  let cfg: OrchestratorConfig = settings
    .try_deserialize()
    .context("failed to deserialise OrchestratorConfig")?;

  // Open the SQLite registry.
  let db_path = expand_tilde(&cfg.db_path);
  let registry = Arc::new(
    SqliteRegistry::open(&db_path)
      .await
      .with_context(|| format!("failed to open registry at {db_path:?}"))?,
  );

  // Wire the training side.
  let artifact_dir = expand_tilde(&cfg.artifact_dir);
  let artifacts = ArtifactStore::new(artifact_dir.clone());
  let roster = Arc::new(
    HttpRoster::new(RosterConfig {
      base_url: cfg.roster_url.clone(),
      username: cfg.roster_username.clone(),
      password: cfg.roster_password.clone(),
      timeout:  Duration::from_secs(cfg.http_timeout_secs),
    })
    .context("failed to build roster client")?,
  );
  let training = TrainingService::new(cfg.training_service_url.clone());

  let orchestrator = Arc::new(Orchestrator::new(
    Arc::clone(&registry),
    Arc::clone(&roster),
    training.clone(),
    training,
    artifacts,
    cfg.max_parallel_trainings,
  ));

  // Install the retrain cron and its config watcher on independent timers.
  let default_time = CronTime::new(cfg.train_hour, cfg.train_minute)
    .context("train_hour/train_minute out of range")?;
  let (cron_tx, cron_rx) = watch::channel(default_time);
  tokio::spawn(cron::watch_config(
    Arc::clone(&roster),
    default_time,
    Duration::from_secs(cfg.config_poll_secs),
    cron_tx,
  ));
  tokio::spawn(cron::run_retrain_cron(Arc::clone(&orchestrator), cron_rx));

  // Serve the registry API.
  let state = AppState {
    registry,
    artifact_root: artifact_dir,
    auth: Arc::new(AuthConfig {
      username:      cfg.auth_username.clone(),
      password_hash: cfg.auth_password_hash.clone(),
    }),
    tokens: Arc::new(TokenStore::new(Duration::from_secs(cfg.token_ttl_secs))),
  };

  let app = axum::Router::new()
    .nest("/api", rollcall_api::router(state))
    .layer(tower_http::trace::TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  Ok(())
}

/// Resolve on Ctrl-C / SIGTERM. An in-flight training run is abandoned with
/// nothing committed; the next cycle restarts it from scratch.
async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };
  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(_) => std::future::pending().await,
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
  tracing::info!("shutdown signal received");
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
