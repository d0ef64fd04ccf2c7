//! In-process servers bound to ephemeral ports

use crate::error::{E2eError, E2eResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wgplane_common::runner::CommandRunner;
use wgplane_common::{Database, InterfaceLocks, Stores};
use wgplane_daemon::config::{BackendKind, DaemonConfig};
use wgplane_daemon::{server as daemon_server, DaemonState};
use wgplane_web::config::{WebBackend, WebConfig};
use wgplane_web::{server as web_server, SelfService};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A running `wgplaned` router
pub struct DaemonHandle {
    pub base_url: String,
    pub state: DaemonState,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    /// Serve a command-backend daemon whose host commands go to `runner`.
    pub async fn spawn(runner: Arc<dyn CommandRunner>, store_path: &Path) -> E2eResult<Self> {
        let config = DaemonConfig {
            store_path: store_path.to_path_buf(),
            listen: "127.0.0.1:0".to_string(),
            backend: BackendKind::Command,
            ..Default::default()
        };
        let db = Database::open(config.db_path())?;
        let state = DaemonState::with_database(&config, db, runner);

        let listener = tokio::net::TcpListener::bind(&config.listen).await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let shutdown = CancellationToken::new();
        let task = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = daemon_server::serve(listener, state, shutdown).await {
                    warn!("Daemon server stopped: {}", e);
                }
            })
        };

        wait_for_healthy(&base_url, STARTUP_TIMEOUT).await?;
        info!("Daemon is healthy at {}", base_url);
        Ok(Self {
            base_url,
            state,
            shutdown,
            task,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state.config().db_path()
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

/// A running self-service server delegating to a daemon
pub struct WebHandle {
    pub base_url: String,
    pub service: SelfService,
    pub stores: Stores,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WebHandle {
    pub async fn spawn(daemon_url: &str, db_path: &Path, identity_header: &str) -> E2eResult<Self> {
        let config = WebConfig {
            listen: "127.0.0.1:0".to_string(),
            db_path: db_path.to_path_buf(),
            daemon_url: daemon_url.to_string(),
            identity_header: identity_header.to_string(),
            rpc_timeout_secs: 5,
            backend: WebBackend::Delegating,
        };

        let db = Database::open(&config.db_path)?;
        let stores = Stores::new(&db);
        let repo = config.repository(&stores)?;
        let service = SelfService::new(repo, stores.clone(), InterfaceLocks::new());

        let listener = tokio::net::TcpListener::bind(&config.listen).await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let shutdown = CancellationToken::new();
        let task = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            let header = config.identity_header.clone();
            tokio::spawn(async move {
                if let Err(e) = web_server::serve(listener, service, &header, shutdown).await {
                    warn!("Self-service server stopped: {}", e);
                }
            })
        };

        wait_for_healthy(&base_url, STARTUP_TIMEOUT).await?;
        info!("Self-service is healthy at {}", base_url);
        Ok(Self {
            base_url,
            service,
            stores,
            shutdown,
            task,
        })
    }
}

impl Drop for WebHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

/// Poll `<base>/health` until it answers 2xx.
async fn wait_for_healthy(base_url: &str, timeout: Duration) -> E2eResult<()> {
    let health_url = format!("{}/health", base_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| E2eError::ServerStartup(e.to_string()))?;

    let start = std::time::Instant::now();
    let mut attempts = 0;
    while start.elapsed() < timeout {
        attempts += 1;
        match client.get(&health_url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => warn!("Health check returned {}", resp.status()),
            // Connection refused is expected while the server is starting
            Err(e) if e.is_connect() => {}
            Err(e) => warn!("Health check error: {}", e),
        }
        sleep(Duration::from_millis(50)).await;
    }
    Err(E2eError::ServerHealthCheck(attempts))
}
