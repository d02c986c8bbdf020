//! deployd - Entry Point
//!
//! Single-process deployment coordinator: runs build and deploy pipelines for
//! services and streams their logs live to any number of observers.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::filesys::file::File;
use deployd::logs::{init_logging, LogLevel, LogOptions};
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::Settings;
use deployd::utils::version_info;

#[derive(Parser)]
#[command(name = "deployd")]
#[command(about = "Deployment coordinator with live log streaming")]
struct Args {
    /// Base directory for settings, deployment records and log files
    #[arg(long, env = "DEPLOYD_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Settings file (defaults to <base-dir>/settings.json)
    #[arg(long, env = "DEPLOYD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Print version information and exit
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let version = version_info();
    if args.version {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    let layout = args
        .base_dir
        .map(StorageLayout::new)
        .unwrap_or_default();
    let settings_file = args
        .config
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());

    let mut settings = Settings::load(&settings_file)
        .await
        .context("unable to read settings")?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    })
    .context("unable to initialize logging")?;

    let options = AppOptions::from_settings(&settings, layout);
    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        "Running deployd with options: {:?}",
        options
    );

    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Coordinator stopped with an error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
