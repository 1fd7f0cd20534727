//! Conduit server binary.
//!
//! Wires settings → store → permission engine → session manager → HTTP
//! surface, runs orphan cleanup, and serves until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use conduit_core::logging::init_logging;
use conduit_permissions::PermissionEngine;
use conduit_runtime::{EventBus, SessionManager, SessionManagerConfig};
use conduit_server::AppState;
use conduit_settings::{ConduitSettings, load_settings_from_path};
use conduit_store::Store;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Conduit — orchestrates AI coding-agent subprocesses behind a local API.
#[derive(Debug, Parser)]
#[command(name = "conduit", version, about)]
struct Cli {
    /// Settings file (default: ~/.conduit/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Database file (default: ~/.conduit/conduit.db).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

fn load_settings(cli: &Cli) -> ConduitSettings {
    let mut settings = match &cli.settings {
        Some(path) => match load_settings_from_path(path) {
            Ok(settings) => settings,
            Err(error) => {
                eprintln!("failed to load settings from {}: {error}", path.display());
                ConduitSettings::default()
            }
        },
        None => match conduit_settings::load_settings() {
            Ok(settings) => settings,
            Err(error) => {
                eprintln!("failed to load settings: {error}");
                ConduitSettings::default()
            }
        },
    };
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings
}

fn database_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(path) = &cli.db {
        return Ok(path.clone());
    }
    let home = std::env::var_os("HOME").context("HOME is not set")?;
    let dir = PathBuf::from(home).join(".conduit");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir.join("conduit.db"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli);
    init_logging(&settings.logging.level, settings.logging.json);
    conduit_settings::init_settings(settings.clone());

    let db_path = database_path(&cli)?;
    let store = Arc::new(
        Store::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    info!(db = %db_path.display(), "store opened");

    let metrics_handle = conduit_server::metrics::install_recorder();
    let bus = EventBus::new();
    let permissions = Arc::new(PermissionEngine::new(Arc::clone(&store)));
    let manager = SessionManager::new(
        SessionManagerConfig {
            cli_path: settings.agent.cli_path.clone(),
            access_token: settings.agent.access_token.clone(),
            port_range_start: settings.bridge.port_range_start,
            port_range_end: settings.bridge.port_range_end,
            max_sessions: settings.session.max_sessions,
        },
        Arc::clone(&store),
        bus,
        permissions,
    );

    // No session may stay "active in the database, dead in reality" across
    // restarts.
    let orphans = manager.cleanup_orphans().context("orphan cleanup failed")?;
    if orphans > 0 {
        info!(orphans, "cleaned up orphaned sessions from previous run");
    }

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let state = AppState::new(Arc::clone(&manager), metrics_handle);
    conduit_server::serve(state, addr, shutdown_signal())
        .await
        .context("server error")?;

    manager.shutdown().await;
    info!("conduit stopped");
    Ok(())
}
