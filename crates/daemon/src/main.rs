//! WgPlane Daemon
//!
//! Rebuilds live WireGuard state from the database, then serves the admin
//! and live surfaces until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wgplane_daemon::config::{parse_interface_list, BackendKind, DaemonConfig};
use wgplane_daemon::{server, DaemonState, Reconciler};

#[derive(Parser)]
#[command(name = "wgplaned")]
#[command(about = "WgPlane daemon - WireGuard interface, peer and firewall management")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: <store>/config.toml)
    #[arg(short, long, env = "WGPLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long, env = "WGPLANE_STORE")]
    store: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "WGPLANE_LISTEN")]
    listen: Option<String>,

    /// Live-state backend
    #[arg(short, long, value_enum, env = "WGPLANE_BACKEND")]
    backend: Option<BackendKind>,

    /// Comma separated interfaces bootstrap must leave alone
    #[arg(long, env = "WGPLANE_SYSTEM_WG_INTERFACES")]
    exclude_interfaces: Option<String>,

    /// Skip startup reconciliation
    #[arg(long)]
    no_bootstrap: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<DaemonConfig> {
        let store_path = self.store.clone().unwrap_or_else(wgplane_common::default_store_path);
        let path = self.config.clone().unwrap_or_else(|| store_path.join("config.toml"));
        let mut config =
            DaemonConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;

        if self.store.is_some() {
            config.store_path = store_path;
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(list) = &self.exclude_interfaces {
            config
                .bootstrap
                .excluded_interfaces
                .extend(parse_interface_list(list));
        }
        if self.no_bootstrap {
            config.bootstrap.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("WgPlane daemon v{}", wgplane_common::VERSION);

    let config = cli.resolve_config()?;
    tokio::fs::create_dir_all(&config.store_path).await?;

    let state = DaemonState::new(&config)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal.cancel();
    });

    match state.command_repo() {
        Some(repo) if config.bootstrap.enabled => {
            let reconciler = Reconciler::new(
                repo.clone(),
                state.stores().clone(),
                config.bootstrap.excluded_interfaces.clone(),
            );
            if let Err(e) = reconciler.bootstrap(&shutdown).await {
                if e.is_cancelled() {
                    info!("Bootstrap interrupted, exiting");
                    return Ok(());
                }
                error!("Bootstrap failed: {}", e);
                return Err(anyhow::Error::new(e).context("bootstrap"));
            }
        }
        Some(_) => warn!("Bootstrap disabled; live state may differ from the database"),
        None => info!("Skipping bootstrap for the {} backend", state.repo().backend()),
    }

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    server::serve(listener, state, shutdown).await?;

    info!("Daemon shutdown complete");
    Ok(())
}
