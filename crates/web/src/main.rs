//! WgPlane self-service server

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wgplane_common::{Database, InterfaceLocks, Stores};
use wgplane_web::config::{WebBackend, WebConfig};
use wgplane_web::{server, SelfService};

#[derive(Parser)]
#[command(name = "wgplane-web")]
#[command(about = "WgPlane self-service server - manage your own WireGuard peers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WGPLANE_WEB_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "WGPLANE_WEB_LISTEN")]
    listen: Option<String>,

    /// Database shared with the daemon
    #[arg(long, env = "WGPLANE_DB")]
    db: Option<PathBuf>,

    /// Daemon base URL
    #[arg(long, env = "WGPLANE_DAEMON_URL")]
    daemon_url: Option<String>,

    /// Header carrying the caller's email
    #[arg(long, env = "WGPLANE_IDENTITY_HEADER")]
    identity_header: Option<String>,

    /// Live-state backend
    #[arg(short, long, value_enum, env = "WGPLANE_WEB_BACKEND")]
    backend: Option<WebBackend>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<WebConfig> {
        let mut config = match &self.config {
            Some(path) => WebConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => WebConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(url) = &self.daemon_url {
            config.daemon_url = url.clone();
        }
        if let Some(header) = &self.identity_header {
            config.identity_header = header.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

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

    let config = cli.resolve_config()?;
    info!(
        "WgPlane self-service v{} ({:?} backend, daemon {})",
        wgplane_common::VERSION,
        config.backend,
        config.daemon_url
    );

    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let stores = Stores::new(&db);
    let repo = config.repository(&stores)?;
    let service = SelfService::new(repo, stores, InterfaceLocks::new());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    server::serve(listener, service, &config.identity_header, shutdown).await?;

    info!("Self-service shutdown complete");
    Ok(())
}
