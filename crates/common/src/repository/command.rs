//! Command backend: drives the host's `ip`, `wg` and `iptables`
//!
//! Multi-step operations run strictly in order and stop at the first failing
//! step. Nothing is rolled back, so a failure can leave a partially configured
//! interface behind; the error names the command that failed.

use super::firewall::{Firewall, FirewallConfig};
use super::{Capabilities, Repository};
use crate::allocator::{allocate_peer_address, used_addresses};
use crate::destinations::with_own_address;
use crate::peer_config::PeerConfig;
use crate::runner::CommandRunner;
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Repository backed by host commands
#[derive(Clone)]
pub struct CommandRepository {
    runner: Arc<dyn CommandRunner>,
    firewall: Firewall,
}

impl CommandRepository {
    pub fn new(runner: Arc<dyn CommandRunner>, firewall: FirewallConfig) -> Self {
        Self {
            firewall: Firewall::new(runner.clone(), firewall),
            runner,
        }
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    async fn run(&self, cancel: &CancellationToken, program: &str, args: &[&str]) -> Result<String> {
        self.runner.run(cancel, program, args).await
    }

    // ========================================================================
    // Host interface control used by bootstrap
    // ========================================================================

    /// Names of every WireGuard interface on the host
    pub async fn list_interface_names(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let output = self.run(cancel, "wg", &["show", "interfaces"]).await?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    pub async fn set_link_down(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        self.run(cancel, "ip", &["link", "set", "down", "dev", name]).await?;
        Ok(())
    }

    // ========================================================================
    // Interface inspection
    // ========================================================================

    async fn describe_interface(&self, cancel: &CancellationToken, name: &str) -> Result<LiveInterface> {
        let public_key = self.run(cancel, "wg", &["show", name, "public-key"]).await?;

        let port = self.run(cancel, "wg", &["show", name, "listen-port"]).await?;
        let listen_port = port
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::Internal(format!("parse listen port {:?}: {}", port, e)))?;

        let address = self.interface_address(cancel, name).await?;
        let mtu = self.interface_mtu(cancel, name).await?;

        Ok(LiveInterface {
            id: name.to_string(),
            name: name.to_string(),
            address,
            listen_port,
            public_key: public_key.trim().to_string(),
            mtu,
        })
    }

    /// First IPv4 `inet` address of the link, in CIDR form
    async fn interface_address(&self, cancel: &CancellationToken, name: &str) -> Result<String> {
        let output = match self.run(cancel, "ip", &["-4", "addr", "show", "dev", name]).await {
            Ok(output) => output,
            Err(Error::Command { message, .. }) if message.contains("does not exist") => {
                return Err(Error::not_found("interface", name));
            }
            Err(e) => return Err(e),
        };

        output
            .lines()
            .find_map(|line| token_after(line, "inet"))
            .map(str::to_string)
            .ok_or_else(|| Error::Internal(format!("no IPv4 address on interface {}", name)))
    }

    async fn interface_mtu(&self, cancel: &CancellationToken, name: &str) -> Result<u32> {
        let output = self.run(cancel, "ip", &["link", "show", "dev", name]).await?;
        let mtu = token_after(&output, "mtu")
            .ok_or_else(|| Error::Internal(format!("mtu not found for {}", name)))?;
        mtu.parse()
            .map_err(|e| Error::Internal(format!("parse mtu {:?}: {}", mtu, e)))
    }

    /// Addresses currently routed to peers of the interface
    async fn peer_addresses(&self, cancel: &CancellationToken, name: &str) -> Result<Vec<String>> {
        let output = self.run(cancel, "wg", &["show", name, "allowed-ips"]).await?;
        Ok(output
            .lines()
            .flat_map(|line| line.split_whitespace().skip(1))
            .flat_map(|list| list.split(','))
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect())
    }

    async fn peer_transfers(&self, cancel: &CancellationToken, name: &str) -> Result<HashMap<String, (u64, u64)>> {
        let output = self.run(cancel, "wg", &["show", name, "transfer"]).await?;
        let mut transfers = HashMap::new();
        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                continue;
            }
            let rx = parse_counter(fields[1])?;
            let tx = parse_counter(fields[2])?;
            transfers.insert(fields[0].to_string(), (rx, tx));
        }
        Ok(transfers)
    }

    async fn peer_handshakes(&self, cancel: &CancellationToken, name: &str) -> Result<HashMap<String, i64>> {
        let output = self.run(cancel, "wg", &["show", name, "latest-handshakes"]).await?;
        let mut handshakes = HashMap::new();
        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                continue;
            }
            let at = fields[1]
                .parse::<i64>()
                .map_err(|e| Error::Internal(format!("parse handshake {:?}: {}", fields[1], e)))?;
            handshakes.insert(fields[0].to_string(), at);
        }
        Ok(handshakes)
    }
}

fn token_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let mut fields = text.split_whitespace();
    while let Some(field) = fields.next() {
        if field == key {
            return fields.next();
        }
    }
    None
}

fn parse_counter(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| Error::Internal(format!("parse transfer counter {:?}: {}", value, e)))
}

#[async_trait]
impl Repository for CommandRepository {
    fn backend(&self) -> &'static str {
        "command"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            firewall: true,
            host: true,
        }
    }

    async fn list_interfaces(&self, cancel: &CancellationToken) -> Result<Vec<LiveInterface>> {
        let mut interfaces = Vec::new();
        for name in self.list_interface_names(cancel).await? {
            interfaces.push(self.describe_interface(cancel, &name).await?);
        }
        Ok(interfaces)
    }

    async fn get_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<LiveInterface> {
        // `wg show` on a missing link fails before the address lookup can classify it
        if !self.list_interface_names(cancel).await?.iter().any(|n| n == interface_id) {
            return Err(Error::not_found("interface", interface_id));
        }
        self.describe_interface(cancel, interface_id).await
    }

    async fn create_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        let id = config.id.as_str();
        let port = config.listen_port.to_string();
        let mtu = config.mtu.to_string();

        self.run(cancel, "ip", &["link", "add", "dev", id, "type", "wireguard"]).await?;

        let private_key = self.run(cancel, "wg", &["genkey"]).await?;
        let private_key = format!("{}\n", private_key.trim());
        self.runner
            .run_with_input(
                cancel,
                &private_key,
                "wg",
                &["set", id, "private-key", "/dev/fd/0", "listen-port", &port],
            )
            .await?;

        self.run(cancel, "ip", &["address", "add", &config.address, "dev", id]).await?;
        self.run(cancel, "ip", &["link", "set", "mtu", &mtu, "dev", id]).await?;
        self.run(cancel, "ip", &["link", "set", "up", "dev", id]).await?;

        info!("Created interface {} at {} (port {})", id, config.address, config.listen_port);
        self.describe_interface(cancel, id).await
    }

    async fn update_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        let id = config.id.as_str();
        let port = config.listen_port.to_string();
        let mtu = config.mtu.to_string();

        self.run(cancel, "ip", &["address", "replace", &config.address, "dev", id]).await?;
        self.run(cancel, "wg", &["set", id, "listen-port", &port]).await?;
        self.run(cancel, "ip", &["link", "set", "mtu", &mtu, "dev", id]).await?;
        self.run(cancel, "ip", &["link", "set", "up", "dev", id]).await?;

        info!("Updated interface {}", id);
        self.describe_interface(cancel, id).await
    }

    async fn delete_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<()> {
        self.run(cancel, "ip", &["link", "delete", "dev", interface_id]).await?;
        info!("Deleted interface {}", interface_id);
        Ok(())
    }

    async fn create_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer> {
        if endpoint.trim().is_empty() {
            return Err(Error::validation("endpoint is required"));
        }
        let iface = self.describe_interface(cancel, interface_id).await?;

        let peers = self.peer_addresses(cancel, interface_id).await?;
        let used = used_addresses(peers.iter().map(String::as_str));
        let allowed_ip = allocate_peer_address(&iface.address, &used)?;

        let private_key = self.run(cancel, "wg", &["genkey"]).await?;
        let private_key = private_key.trim().to_string();
        let public_key = self
            .runner
            .run_with_input(cancel, &format!("{}\n", private_key), "wg", &["pubkey"])
            .await?;
        let public_key = public_key.trim().to_string();

        let allowed_ips = with_own_address(&allowed_ip, allowed_ips);
        let joined = allowed_ips.join(",");
        self.run(
            cancel,
            "wg",
            &["set", interface_id, "peer", &public_key, "allowed-ips", &joined],
        )
        .await?;

        let config = PeerConfig {
            private_key: &private_key,
            address: &allowed_ip,
            server_public_key: &iface.public_key,
            endpoint,
            listen_port: iface.listen_port,
            allowed_ips: &allowed_ips,
        }
        .render();

        info!(
            interface = interface_id,
            peer = %public_key,
            address = %allowed_ip,
            "WireGuard peer created"
        );

        Ok(LivePeer {
            id: public_key,
            interface_id: interface_id.to_string(),
            allowed_ip,
            config,
        })
    }

    async fn update_peer_allowed_ips(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_id: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        if allowed_ips.is_empty() {
            return Err(Error::validation("allowed IPs are required"));
        }
        let joined = allowed_ips.join(",");
        self.run(
            cancel,
            "wg",
            &["set", interface_id, "peer", peer_id, "allowed-ips", &joined],
        )
        .await?;
        debug!("Peer {} on {} now allows {}", peer_id, interface_id, joined);
        Ok(())
    }

    async fn delete_peer(&self, cancel: &CancellationToken, peer_id: &str) -> Result<()> {
        for name in self.list_interface_names(cancel).await? {
            let peers = self.run(cancel, "wg", &["show", &name, "peers"]).await?;
            if !peers.split_whitespace().any(|p| p == peer_id) {
                continue;
            }
            self.run(cancel, "wg", &["set", &name, "peer", peer_id, "remove"]).await?;
            info!("Removed peer {} from {}", peer_id, name);
            return Ok(());
        }
        Err(Error::not_found("peer", peer_id))
    }

    async fn list_peer_stats(&self, cancel: &CancellationToken) -> Result<Vec<PeerStat>> {
        let mut stats: HashMap<String, PeerStat> = HashMap::new();
        for name in self.list_interface_names(cancel).await? {
            let transfers = self.peer_transfers(cancel, &name).await?;
            let handshakes = self.peer_handshakes(cancel, &name).await?;

            for (peer_id, (rx, tx)) in transfers {
                let last_handshake_at = handshakes.get(&peer_id).copied().unwrap_or_default();
                stats.insert(
                    peer_id.clone(),
                    PeerStat {
                        peer_id,
                        interface_id: name.clone(),
                        rx_bytes: rx,
                        tx_bytes: tx,
                        last_handshake_at,
                    },
                );
            }
            for (peer_id, at) in handshakes {
                stats.entry(peer_id.clone()).or_insert_with(|| PeerStat {
                    peer_id,
                    interface_id: name.clone(),
                    last_handshake_at: at,
                    ..Default::default()
                });
            }
        }

        let mut stats: Vec<PeerStat> = stats.into_values().collect();
        stats.sort_by(|a, b| (&a.interface_id, &a.peer_id).cmp(&(&b.interface_id, &b.peer_id)));
        Ok(stats)
    }

    async fn list_firewall_rules(&self, cancel: &CancellationToken) -> Result<String> {
        self.firewall.list_rules(cancel).await
    }

    async fn list_configs(
        &self,
        cancel: &CancellationToken,
        interface_id: Option<&str>,
    ) -> Result<Vec<InterfaceConfigDump>> {
        let mut dumps = Vec::new();
        for name in self.list_interface_names(cancel).await? {
            if interface_id.map_or(false, |id| id != name) {
                continue;
            }
            let config = self.run(cancel, "wg", &["showconf", &name]).await?;
            dumps.push(InterfaceConfigDump {
                interface_id: name,
                config,
            });
        }

        if let Some(id) = interface_id {
            if dumps.is_empty() {
                return Err(Error::not_found("interface", id));
            }
        }
        Ok(dumps)
    }

    async fn ensure_firewall_chain(&self, cancel: &CancellationToken) -> Result<()> {
        self.firewall.ensure_chain(cancel).await
    }

    async fn sync_peer_firewall_rules(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_allowed_ip: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        self.firewall
            .sync_peer_rules(cancel, interface_id, peer_allowed_ip, allowed_ips)
            .await
    }

    async fn remove_peer_firewall_rules(&self, cancel: &CancellationToken, peer_allowed_ip: &str) -> Result<()> {
        self.firewall.remove_peer_rules(cancel, peer_allowed_ip).await
    }
}
