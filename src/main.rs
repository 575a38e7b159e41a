mod app;
mod capability;
mod cli;
mod config;
mod control;
mod crashlog;
mod error;
mod framerate;
mod gpu;
#[cfg(feature = "gui")]
mod gui;
mod history;
mod metrics;
mod overlay;
mod pacing;
mod settings;
mod tasks;
mod theme;
mod tray;
mod updater;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let default_directive = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    cli.execute().await
}
