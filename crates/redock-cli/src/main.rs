//! redock - command-line console for a Redock instance.
//!
//! Signs in, keeps the session alive across invocations and sends
//! authenticated requests to the instance API.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{CliNavigator, Command};
use redock_core::config::BackendKind;
use redock_core::Config;

#[derive(Debug, Parser)]
#[command(name = "redock", version, about = "Command-line console for a Redock instance")]
struct Cli {
    /// Instance address, e.g. http://127.0.0.1:6001
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Keep credentials in memory only; nothing is persisted
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    // Held until exit so buffered file logs are flushed
    let _log_guard = init_tracing(cli.log_file.as_deref())?;
    info!("redock starting");

    let config = Config::load().context("Failed to load configuration")?;
    let mut effective = config.clone();
    if let Some(base_url) = cli.base_url {
        effective.base_url = base_url;
    }
    if cli.ephemeral {
        effective.credential_backend = BackendKind::Memory;
    }

    let client = effective.build_client(Arc::new(CliNavigator))?;
    commands::run(cli.command, config, &effective, &client).await
}
