//! `rollcall-agent` — edge daemon keeping a device's active face model in
//! sync with its room's class schedule.
//!
//! # Usage
//!
//! ```
//! rollcall-agent --config /etc/rollcall/agent.toml
//! ```

mod cache;
mod client;
mod config;
mod health;
mod monitor;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use config::AgentConfig;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rollcall-agent", about = "Rollcall edge device agent")]
struct Args {
  /// Path to the TOML config file.
  #[arg(short, long, default_value = "agent.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();
  let cfg = AgentConfig::load(&args.config)?;

  // A shutdown signal flips the flag; the loop exits between ticks.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  tokio::spawn(async move {
    wait_for_signal().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
  });

  run::run(cfg, shutdown_rx).await
}

async fn wait_for_signal() {
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
}
