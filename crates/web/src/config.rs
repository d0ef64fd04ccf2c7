//! Self-service server configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wgplane_common::repository::{DelegatingRepository, SimulationRepository};
use wgplane_common::{Repository, Result, Stores};

/// Self-service server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP listen address
    pub listen: String,

    /// Database shared with the daemon
    pub db_path: PathBuf,

    /// Base URL of the privileged daemon
    pub daemon_url: String,

    /// Request header carrying the caller's email, set by the fronting proxy
    pub identity_header: String,

    /// Upper bound for a single call to the daemon
    pub rpc_timeout_secs: u64,

    /// Live-state backend
    pub backend: WebBackend,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            db_path: wgplane_common::default_db_path(),
            daemon_url: "http://127.0.0.1:8081".to_string(),
            identity_header: "X-Email".to_string(),
            rpc_timeout_secs: 30,
            backend: WebBackend::Delegating,
        }
    }
}

/// Which repository backend the self-service server uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WebBackend {
    /// Forward live operations to `wgplaned`
    Delegating,
    /// No host access; for development
    Simulation,
}

impl WebConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Build the configured live-state backend.
    pub fn repository(&self, stores: &Stores) -> Result<Arc<dyn Repository>> {
        let repo: Arc<dyn Repository> = match self.backend {
            WebBackend::Delegating => Arc::new(DelegatingRepository::new(&self.daemon_url, self.rpc_timeout())?),
            WebBackend::Simulation => Arc::new(SimulationRepository::new(
                stores.interfaces.clone(),
                stores.peers.clone(),
            )),
        };
        Ok(repo)
    }
}
