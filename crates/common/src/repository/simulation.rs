//! Simulation backend for unprivileged development setups
//!
//! Interfaces are read back from the interface store, peers are fabricated
//! with real key pairs and addresses allocated against the peer store. No host
//! state is touched; firewall calls succeed without effect.

use super::{Capabilities, Repository};
use crate::allocator::{allocate_peer_address, used_addresses};
use crate::crypto::{deterministic_key, generate_keypair};
use crate::destinations::with_own_address;
use crate::peer_config::PeerConfig;
use crate::store::{InterfaceStore, PeerStore};
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct SimulationRepository {
    interfaces: InterfaceStore,
    peers: PeerStore,
    /// Peers created through this backend, keyed by public key
    created: Arc<DashMap<String, LivePeer>>,
}

impl SimulationRepository {
    pub fn new(interfaces: InterfaceStore, peers: PeerStore) -> Self {
        Self {
            interfaces,
            peers,
            created: Arc::new(DashMap::new()),
        }
    }

    fn config(&self, interface_id: &str) -> Result<InterfaceConfig> {
        self.interfaces
            .get(interface_id)?
            .ok_or_else(|| Error::not_found("interface", interface_id))
    }

    fn allocate(&self, config: &InterfaceConfig) -> Result<String> {
        let stored = self.peers.list_by_interface(&config.id)?;
        let created: Vec<String> = self
            .created
            .iter()
            .filter(|entry| entry.interface_id == config.id)
            .map(|entry| entry.allowed_ip.clone())
            .collect();

        let used = used_addresses(
            stored
                .iter()
                .map(|p| p.allowed_ip.as_str())
                .chain(created.iter().map(String::as_str)),
        );
        allocate_peer_address(&config.address, &used)
    }
}

fn simulated_interface(config: &InterfaceConfig) -> LiveInterface {
    LiveInterface {
        id: config.id.clone(),
        name: config.name.clone(),
        address: config.address.clone(),
        listen_port: config.listen_port,
        public_key: deterministic_key(&config.id),
        mtu: config.mtu,
    }
}

#[async_trait]
impl Repository for SimulationRepository {
    fn backend(&self) -> &'static str {
        "simulation"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            firewall: true,
            host: false,
        }
    }

    async fn list_interfaces(&self, _cancel: &CancellationToken) -> Result<Vec<LiveInterface>> {
        Ok(self.interfaces.list()?.iter().map(simulated_interface).collect())
    }

    async fn get_interface(&self, _cancel: &CancellationToken, interface_id: &str) -> Result<LiveInterface> {
        Ok(simulated_interface(&self.config(interface_id)?))
    }

    async fn create_interface(&self, _cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        Ok(simulated_interface(config))
    }

    async fn update_interface(&self, _cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        Ok(simulated_interface(config))
    }

    async fn delete_interface(&self, _cancel: &CancellationToken, interface_id: &str) -> Result<()> {
        self.created.retain(|_, peer| peer.interface_id != interface_id);
        Ok(())
    }

    async fn create_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let config = self.config(interface_id)?;
        let endpoint = if endpoint.trim().is_empty() {
            config.endpoint.as_str()
        } else {
            endpoint
        };
        if endpoint.trim().is_empty() {
            return Err(Error::validation("endpoint is required"));
        }

        let allowed_ip = self.allocate(&config)?;
        let keys = generate_keypair();
        let allowed_ips = with_own_address(&allowed_ip, allowed_ips);

        let rendered = PeerConfig {
            private_key: &keys.private_key,
            address: &allowed_ip,
            server_public_key: &deterministic_key(&config.id),
            endpoint,
            listen_port: config.listen_port,
            allowed_ips: &allowed_ips,
        }
        .render();

        let peer = LivePeer {
            id: keys.public_key,
            interface_id: interface_id.to_string(),
            allowed_ip,
            config: rendered,
        };
        debug!("Simulated peer {} at {}", peer.id, peer.allowed_ip);
        self.created.insert(peer.id.clone(), peer.clone());
        Ok(peer)
    }

    async fn update_peer_allowed_ips(
        &self,
        _cancel: &CancellationToken,
        _interface_id: &str,
        _peer_id: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        if allowed_ips.is_empty() {
            return Err(Error::validation("allowed IPs are required"));
        }
        Ok(())
    }

    async fn delete_peer(&self, _cancel: &CancellationToken, peer_id: &str) -> Result<()> {
        let created = self.created.remove(peer_id).is_some();
        if created || self.peers.get_by_peer_id(peer_id)?.is_some() {
            return Ok(());
        }
        Err(Error::not_found("peer", peer_id))
    }

    async fn list_peer_stats(&self, _cancel: &CancellationToken) -> Result<Vec<PeerStat>> {
        let mut stats: Vec<PeerStat> = self
            .peers
            .list()?
            .into_iter()
            .map(|peer| PeerStat {
                peer_id: peer.peer_id,
                interface_id: peer.interface_id,
                ..Default::default()
            })
            .collect();

        for entry in self.created.iter() {
            if stats.iter().any(|s| s.peer_id == entry.id) {
                continue;
            }
            stats.push(PeerStat {
                peer_id: entry.id.clone(),
                interface_id: entry.interface_id.clone(),
                ..Default::default()
            });
        }
        Ok(stats)
    }

    async fn list_firewall_rules(&self, _cancel: &CancellationToken) -> Result<String> {
        Ok(String::new())
    }

    async fn list_configs(
        &self,
        _cancel: &CancellationToken,
        interface_id: Option<&str>,
    ) -> Result<Vec<InterfaceConfigDump>> {
        Ok(self
            .interfaces
            .list()?
            .into_iter()
            .filter(|config| interface_id.map_or(true, |id| id == config.id))
            .map(|config| InterfaceConfigDump {
                interface_id: config.id,
                config: String::new(),
            })
            .collect())
    }

    async fn ensure_firewall_chain(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn sync_peer_firewall_rules(
        &self,
        _cancel: &CancellationToken,
        _interface_id: &str,
        _peer_allowed_ip: &str,
        _allowed_ips: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn remove_peer_firewall_rules(&self, _cancel: &CancellationToken, _peer_allowed_ip: &str) -> Result<()> {
        Ok(())
    }
}
