use crate::app::{self, Orchestrator, RunOptions};
use crate::config::Config;
use crate::control;
use crate::metrics::MetricsSource;
use crate::updater::{self, UpdateChecker};
use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "osd",
    author,
    version,
    about = "OSD Overlay - always-on-top CPU, RAM, GPU and FPS overlay",
    long_about = "A small translucent performance overlay. Runs the overlay window when no command is given."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Start the overlay (default)")]
    Run {
        #[arg(long, help = "Print each redraw to stdout instead of opening a window")]
        headless: bool,

        #[arg(long, help = "Do not create a system tray icon")]
        no_tray: bool,
    },

    #[command(about = "Take one metrics snapshot and print it as JSON")]
    Snapshot,

    #[command(about = "Check for a newer release")]
    CheckUpdate {
        #[arg(long, help = "Download, verify and launch the installer")]
        install: bool,
    },

    #[command(about = "Inspect or reset the config file")]
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Print the config file location")]
    Path,
    #[command(about = "Print the effective configuration")]
    Show,
    #[command(about = "Overwrite the config file with defaults")]
    Reset,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::config_path)
    }

    pub async fn execute(self) -> Result<()> {
        let config_path = self.config_path();
        let command = self.command.unwrap_or(Commands::Run {
            headless: false,
            no_tray: false,
        });

        match command {
            Commands::Run { headless, no_tray } => handle_run(config_path, headless, no_tray).await,
            Commands::Snapshot => handle_snapshot().await,
            Commands::CheckUpdate { install } => handle_check_update(&config_path, install).await,
            Commands::Config { action } => handle_config_command(&config_path, action),
        }
    }
}

async fn handle_run(config_path: PathBuf, headless: bool, no_tray: bool) -> Result<()> {
    let config = Config::load_from(&config_path);
    let options = RunOptions {
        config_path,
        crash_log_path: Config::crash_log_path(),
        tray: !no_tray,
    };

    if headless {
        let orchestrator = Orchestrator::start(
            config,
            options,
            tokio::runtime::Handle::current(),
            control::channel(),
        );
        return app::run_headless(orchestrator).await;
    }

    launch_window(config, options)
}

#[cfg(feature = "gui")]
fn launch_window(config: Config, options: RunOptions) -> Result<()> {
    crate::gui::run_gui(config, options)
}

#[cfg(not(feature = "gui"))]
fn launch_window(_config: Config, _options: RunOptions) -> Result<()> {
    Err(anyhow::anyhow!(
        "GUI feature not enabled. Use `osd run --headless` or compile with --features gui"
    ))
}

async fn handle_snapshot() -> Result<()> {
    let mut source = MetricsSource::new();
    // CPU usage is a delta between two refreshes.
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    let snapshot = source.sample();
    source.shutdown();

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn handle_check_update(config_path: &Path, install: bool) -> Result<()> {
    let config = Config::load_from(config_path);
    let checker = UpdateChecker::new(&config.update)?;

    println!(
        "{} (current version {})",
        "🔍 Checking for updates...".bold().cyan(),
        updater::CURRENT_VERSION.yellow()
    );

    let Some(update) = checker.check().await else {
        println!("{}", "✅ No newer release found".green());
        return Ok(());
    };

    println!("{} v{}", "⬆️  Update available:".bold().yellow(), update.version.green());
    if let Some(published) = &update.published_at {
        println!("  Published: {}", published);
    }
    if !update.notes.trim().is_empty() {
        println!();
        for line in update.notes.lines() {
            println!("  {}", line);
        }
        println!();
    }

    if !install {
        println!("Run {} to install it.", "osd check-update --install".cyan());
        return Ok(());
    }

    let path = checker
        .download(&update.download_url, |percent| {
            print!("\r  Downloading... {:>5.1}%", percent);
            let _ = std::io::stdout().flush();
        })
        .await;
    println!();

    let Some(path) = path else {
        return Err(anyhow::anyhow!("Download failed"));
    };
    if !updater::verify(&path) {
        return Err(anyhow::anyhow!(
            "Downloaded installer at {} looks incomplete",
            path.display()
        ));
    }
    if !updater::install(&path) {
        return Err(anyhow::anyhow!("Could not start installer {}", path.display()));
    }

    println!("{}", "✅ Installer started".green());
    Ok(())
}

fn handle_config_command(config_path: &Path, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Path => {
            println!("{}", config_path.display());
        }
        ConfigCommands::Show => {
            let config = Config::load_from(config_path);
            println!("{}", "⚙️  OSD Overlay Configuration".bold().cyan());
            println!("  File: {}", config_path.display().to_string().yellow());
            println!();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Reset => {
            Config::default().save(config_path)?;
            println!(
                "{} {}",
                "✅ Config reset to defaults:".green(),
                config_path.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_command_means_run() {
        let cli = Cli::try_parse_from(["osd", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["osd", "run", "--headless", "--config", "/tmp/osd.json"])
            .unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/osd.json"));
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                headless: true,
                no_tray: false
            })
        ));
    }

    #[test]
    fn config_reset_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"refreshMs": 42}"#).unwrap();

        handle_config_command(&path, ConfigCommands::Reset).unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
