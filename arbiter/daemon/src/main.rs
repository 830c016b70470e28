//! Arbiter Daemon
//!
//! Standalone process hosting display arbitration sessions. Every client
//! connecting on the Unix socket gets its own session; display frames for the
//! glasses are written back on the same connection.
//!
//! # Usage
//!
//! ```bash
//! # Default socket ($XDG_RUNTIME_DIR/glasses-arbiter/arbiter.sock)
//! arbiter-daemon
//!
//! # Custom socket and config file
//! arbiter-daemon --socket /tmp/arbiter.sock --config ./arbiter.toml
//!
//! # JSON logs, verbose
//! RUST_LOG=debug arbiter-daemon --log-format json
//! ```
//!
//! # Environment Variables
//!
//! - `ARBITER_SOCKET`: Custom Unix socket path
//! - `ARBITER_CONFIG`: Config file path
//! - `ARBITER_*`: Policy overrides, see `arbiter_core::config`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (ends sessions, removes the socket)

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arbiter_core::{
    load_config, load_config_from_path, ConfigOverrides, ConfigSource, SessionRegistry,
};

use crate::server::DaemonServer;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Display arbitration daemon for smart glasses
#[derive(Debug, Parser)]
#[command(name = "arbiter-daemon", version, about)]
struct Args {
    /// Unix socket to listen on
    #[arg(long, env = "ARBITER_SOCKET")]
    socket: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, env = "ARBITER_CONFIG")]
    config: Option<PathBuf>,

    /// App treated as the core app
    #[arg(long)]
    core_app: Option<String>,

    /// App treated as the dashboard
    #[arg(long)]
    dashboard_app: Option<String>,

    /// Minimum spacing between frames, in milliseconds
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// How long the boot screen stays up, in milliseconds
    #[arg(long)]
    boot_ms: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            core_app: self.core_app.clone(),
            dashboard_app: self.dashboard_app.clone(),
            throttle_delay_ms: self.throttle_ms,
            boot_duration_ms: self.boot_ms,
        }
    }
}

/// Get the default socket path
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise `/tmp/glasses-arbiter-$UID/`
fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("glasses-arbiter")
            .join("arbiter.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/glasses-arbiter-{uid}/arbiter.sock"))
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("arbiter_daemon=info".parse()?)
        .add_directive("arbiter_core=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    info!("Starting Arbiter Daemon");
    info!("PID: {}", std::process::id());

    let (mut config, mut source) = match &args.config {
        Some(path) => load_config_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config().context("Failed to load config")?,
    };
    if args.overrides().apply(&mut config) {
        config
            .validate()
            .context("Command-line overrides produced an invalid config")?;
        source = ConfigSource::Cli;
    }
    info!(
        source = %source,
        core_app = %config.core_app,
        dashboard_app = %config.dashboard_app,
        throttle_ms = config.throttle_delay.as_millis(),
        "Configuration loaded"
    );

    let socket_path = args.socket.clone().unwrap_or_else(default_socket_path);
    let server = DaemonServer::new(socket_path, SessionRegistry::new(config));
    info!(path = ?server.socket_path(), "Socket path");

    let shutdown = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown);
    tokio::spawn(async move {
        wait_for_signal().await;
        notify.notify_one();
    });

    server.run(shutdown).await?;

    info!("Arbiter Daemon stopped");
    Ok(())
}
