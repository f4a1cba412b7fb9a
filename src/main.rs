mod app;
mod cache;
mod commands;
mod config;
mod event;
mod pagerduty;
mod refresh;
mod ui;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pd9s")]
#[command(about = "A terminal dashboard for PagerDuty, inspired by k9s")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pd9s/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Seconds between refresh cycles
  #[arg(short, long)]
  interval: Option<u64>,
}

/// Log to a file; stdout belongs to the dashboard.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::state_dir()
    .or_else(dirs::data_dir)
    .ok_or_else(|| eyre!("Could not determine state directory"))?
    .join("pd9s");

  let appender = tracing_appender::rolling::daily(log_dir, "pd9s.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pd9s=info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override interval if specified on command line
  if let Some(interval) = args.interval {
    config.refresh.interval_secs = interval;
  }

  // Initialize and run the app
  let mut app = app::App::new(config)?;
  app.run().await?;

  Ok(())
}
