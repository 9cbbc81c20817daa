//! DevTool - inspect HTTP(S) traffic from mobile devices.
//!
//! Launches the bundled intercepting proxy, drives its control plane, and
//! prints captured traffic.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devtool_app::cli::Args;
use devtool_app::commands;
use devtool_app::config::AppConfig;

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "devtool", "DevTool").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with file rotation.
///
/// Console output is reserved for command results unless `--debug` is set.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "devtool={0},devtool_core={0},devtool_proxy={0},devtool_app={0},warn",
            log_level
        ))
    });

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            // Rotates daily, keeps the last five files
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("devtool")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                if args.debug {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(std::io::stderr))
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                } else {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                }

                tracing::debug!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load_default().context("Failed to load config")?,
    };
    args.apply_overrides(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the whole run so buffered logs are flushed.
    let _log_guard = init_logging(&args);

    tracing::info!(
        "Starting DevTool v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        args.command
    );

    let config = load_config(&args)?;
    tracing::debug!(?config, "Configuration loaded");

    let Args {
        config: config_path,
        command,
        ..
    } = args;
    let result = commands::execute(config, config_path.as_deref(), command).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}
