//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use wgplane_common::repository::FirewallConfig;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// HTTP listen address for the admin and live surfaces
    pub listen: String,

    /// Live-state backend
    pub backend: BackendKind,

    /// Upper bound for a single host command
    pub command_timeout_secs: u64,

    /// Forwarding chain names
    pub firewall: FirewallConfig,

    /// Startup reconciliation
    pub bootstrap: BootstrapConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: wgplane_common::default_store_path(),
            listen: "127.0.0.1:8081".to_string(),
            backend: BackendKind::Command,
            command_timeout_secs: 30,
            firewall: FirewallConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

/// Which repository backend the daemon drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `ip`, `wg` and `iptables` on this host
    Command,
    /// No host access; for development
    Simulation,
}

/// Startup reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Rebuild live state from the store before serving
    pub enabled: bool,

    /// Interfaces bootstrap never brings down
    pub excluded_interfaces: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_interfaces: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Split a comma separated interface list, dropping blanks.
pub fn parse_interface_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.backend, BackendKind::Command);
        assert_eq!(config.firewall.chain, "WGPLANE_FWD");
        assert!(config.bootstrap.enabled);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DaemonConfig {
            store_path: dir.path().to_path_buf(),
            backend: BackendKind::Simulation,
            ..Default::default()
        };
        config.bootstrap.excluded_interfaces = vec!["wg-mgmt".into()];
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.backend, BackendKind::Simulation);
        assert_eq!(loaded.bootstrap.excluded_interfaces, vec!["wg-mgmt".to_string()]);
        assert_eq!(loaded.db_path(), dir.path().join("state.db"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = \"simulation\"\n[firewall]\nchain = \"VPN\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Simulation);
        assert_eq!(config.firewall.chain, "VPN");
        assert_eq!(config.firewall.forward_chain, "FORWARD");
        assert_eq!(config.command_timeout_secs, 30);
    }

    #[test]
    fn test_interface_list() {
        assert_eq!(parse_interface_list(" wg-a, ,wg-b,"), vec!["wg-a", "wg-b"]);
        assert!(parse_interface_list("").is_empty());
    }
}
