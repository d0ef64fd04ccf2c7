//! iptables forwarding chain management
//!
//! All peer rules live in one dedicated chain jumped to from the top of the
//! forward chain. Each rule is
//! `-A <chain> -i <interface> -s <peer address> -d <destination> -j ACCEPT`.

use crate::runner::CommandRunner;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IPTABLES: &str = "iptables";

/// Firewall chain names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Dedicated chain holding peer accept rules
    pub chain: String,
    /// Host chain that jumps into `chain`
    pub forward_chain: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            chain: "WGPLANE_FWD".to_string(),
            forward_chain: "FORWARD".to_string(),
        }
    }
}

/// Forwarding-chain synchronizer
#[derive(Clone)]
pub struct Firewall {
    runner: Arc<dyn CommandRunner>,
    config: FirewallConfig,
}

impl Firewall {
    pub fn new(runner: Arc<dyn CommandRunner>, config: FirewallConfig) -> Self {
        Self { runner, config }
    }

    pub fn chain(&self) -> &str {
        &self.config.chain
    }

    /// Create the chain if missing and make sure the forward chain jumps to it once.
    pub async fn ensure_chain(&self, cancel: &CancellationToken) -> Result<()> {
        let chain = self.config.chain.as_str();
        let forward = self.config.forward_chain.as_str();

        if let Err(e) = self.runner.run(cancel, IPTABLES, &["-L", chain, "-n"]).await {
            if e.is_cancelled() {
                return Err(e);
            }
            info!("Creating firewall chain {}", chain);
            self.runner.run(cancel, IPTABLES, &["-N", chain]).await?;
        }

        let rules = self.runner.run(cancel, IPTABLES, &["-S", forward]).await?;
        let jump = format!("-A {} -j {}", forward, chain);
        if !rules.lines().any(|line| line.trim() == jump) {
            info!("Inserting jump from {} to {}", forward, chain);
            self.runner
                .run(cancel, IPTABLES, &["-I", forward, "1", "-j", chain])
                .await?;
        }

        Ok(())
    }

    /// Replace the peer's rules with one accept rule per non-self destination.
    pub async fn sync_peer_rules(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_allowed_ip: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        self.ensure_chain(cancel).await?;
        self.remove_peer_rules(cancel, peer_allowed_ip).await?;

        let source = source_address(peer_allowed_ip);
        let chain = self.config.chain.as_str();
        for destination in allowed_ips {
            if destination == peer_allowed_ip {
                continue;
            }
            debug!("Allowing {} -> {} on {}", source, destination, interface_id);
            self.runner
                .run(
                    cancel,
                    IPTABLES,
                    &[
                        "-A", chain, "-i", interface_id, "-s", source, "-d", destination.as_str(), "-j", "ACCEPT",
                    ],
                )
                .await?;
        }

        Ok(())
    }

    /// Delete every chain rule whose source is the peer's address.
    pub async fn remove_peer_rules(&self, cancel: &CancellationToken, peer_allowed_ip: &str) -> Result<()> {
        let chain = self.config.chain.as_str();
        let rules = match self.runner.run(cancel, IPTABLES, &["-S", chain]).await {
            Ok(rules) => rules,
            Err(e) if e.is_cancelled() => return Err(e),
            // Chain not created yet
            Err(_) => return Ok(()),
        };

        let source = source_address(peer_allowed_ip);
        for line in rules.lines() {
            let Some(rule) = line.trim().strip_prefix("-A ") else {
                continue;
            };
            let fields: Vec<&str> = rule.split_whitespace().collect();
            if !matches_source(&fields, source) {
                continue;
            }

            let mut args = Vec::with_capacity(fields.len() + 1);
            args.push("-D");
            args.extend(fields.iter().copied());
            match self.runner.run(cancel, IPTABLES, &args).await {
                Ok(_) => debug!("Removed firewall rule: {}", rule),
                Err(e) if e.is_cancelled() => return Err(e),
                // Already gone
                Err(e) => warn!("Failed to remove firewall rule {}: {}", rule, e),
            }
        }

        Ok(())
    }

    /// `iptables -S <chain>` output
    pub async fn list_rules(&self, cancel: &CancellationToken) -> Result<String> {
        self.runner.run(cancel, IPTABLES, &["-S", self.config.chain.as_str()]).await
    }

    /// Drop every rule in the dedicated chain.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<()> {
        self.runner.run(cancel, IPTABLES, &["-F", self.config.chain.as_str()]).await?;
        Ok(())
    }
}

/// `10.0.0.2/32` -> `10.0.0.2`
fn source_address(peer_allowed_ip: &str) -> &str {
    peer_allowed_ip.strip_suffix("/32").unwrap_or(peer_allowed_ip)
}

/// iptables prints sources with an explicit `/32`; compare on whole tokens so
/// `10.0.0.2` never matches `10.0.0.20`.
fn matches_source(fields: &[&str], source: &str) -> bool {
    fields.windows(2).any(|pair| {
        pair[0] == "-s"
            && (pair[1] == source || pair[1].strip_suffix("/32") == Some(source))
    })
}
