//! Administrator operations
//!
//! Full lifecycle over interfaces, peers, access grants and routes. No
//! ownership checks apply beyond existence. Multi-step operations run in
//! order and stop at the first failure without undoing earlier steps.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wgplane_common::allocator::parse_interface_address;
use wgplane_common::destinations::{creation_destinations, validate_ipv4_cidr};
use wgplane_common::{
    AdminInterface, AllowedEmail, Error, InterfaceConfig, InterfaceConfigDump, InterfaceLocks, InterfaceRoute,
    LivePeer, PeerRecord, PeerRoute, PeerStat, PeerSynchronizer, Repository, Result, Stores,
};

#[derive(Clone)]
pub struct AdminService {
    repo: Arc<dyn Repository>,
    stores: Stores,
    locks: InterfaceLocks,
    sync: PeerSynchronizer,
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} is required", what)));
    }
    Ok(())
}

/// Every field is mandatory and the address must be an IPv4 CIDR.
fn validate_interface_config(config: &InterfaceConfig) -> Result<()> {
    require(&config.id, "interface id")?;
    require(&config.name, "name")?;
    require(&config.address, "address")?;
    if config.listen_port == 0 {
        return Err(Error::validation("listen port is required"));
    }
    if config.mtu == 0 {
        return Err(Error::validation("mtu is required"));
    }
    require(&config.endpoint, "endpoint")?;
    if !config.address.contains('/') {
        return Err(Error::validation("address must be in CIDR notation"));
    }
    parse_interface_address(&config.address)?;
    Ok(())
}

impl AdminService {
    pub fn new(repo: Arc<dyn Repository>, stores: Stores, locks: InterfaceLocks) -> Self {
        let sync = PeerSynchronizer::new(repo.clone(), stores.clone());
        Self {
            repo,
            stores,
            locks,
            sync,
        }
    }

    fn interface_config(&self, interface_id: &str) -> Result<InterfaceConfig> {
        self.stores
            .interfaces
            .get(interface_id)?
            .ok_or_else(|| Error::not_found("interface", interface_id))
    }

    fn peer_record(&self, peer_id: &str) -> Result<PeerRecord> {
        self.stores
            .peers
            .get_by_peer_id(peer_id)?
            .ok_or_else(|| Error::not_found("peer", peer_id))
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    pub async fn list_interfaces(&self, cancel: &CancellationToken) -> Result<Vec<AdminInterface>> {
        let mut items = Vec::new();
        for config in self.stores.interfaces.list()? {
            let live = self.repo.get_interface(cancel, &config.id).await?;
            items.push(AdminInterface::new(live, &config));
        }
        Ok(items)
    }

    pub async fn get_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<AdminInterface> {
        let config = self.interface_config(interface_id)?;
        let live = self.repo.get_interface(cancel, interface_id).await?;
        Ok(AdminInterface::new(live, &config))
    }

    pub async fn create_interface(&self, cancel: &CancellationToken, config: InterfaceConfig) -> Result<AdminInterface> {
        validate_interface_config(&config)?;
        if self.stores.interfaces.get(&config.id)?.is_some() {
            return Err(Error::already_exists("interface", &config.id));
        }

        let _guard = self.locks.lock(&config.id).await;
        let live = self.repo.create_interface(cancel, &config).await?;
        self.stores.interfaces.create(&config)?;

        info!("Interface {} ({}) created at {}", config.id, config.name, config.address);
        Ok(AdminInterface::new(live, &config))
    }

    /// Empty or zero fields keep their stored values.
    pub async fn update_interface(&self, cancel: &CancellationToken, config: InterfaceConfig) -> Result<AdminInterface> {
        let current = self.interface_config(&config.id)?;
        let config = config.merged_with(&current);
        validate_interface_config(&config)?;

        let _guard = self.locks.lock(&config.id).await;
        let live = self.repo.update_interface(cancel, &config).await?;
        self.stores.interfaces.update(&config)?;

        info!("Interface {} updated", config.id);
        Ok(AdminInterface::new(live, &config))
    }

    /// Tear down the interface and everything recorded against it.
    pub async fn delete_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<()> {
        self.interface_config(interface_id)?;
        let _guard = self.locks.lock(interface_id).await;

        let peers = self.stores.peers.list_by_interface(interface_id)?;
        if self.repo.capabilities().firewall {
            for peer in &peers {
                self.repo.remove_peer_firewall_rules(cancel, &peer.allowed_ip).await?;
            }
        }

        self.repo.delete_interface(cancel, interface_id).await?;

        for peer in &peers {
            self.stores.peer_routes.delete_by_peer(&peer.peer_id)?;
        }
        self.stores.interface_routes.delete_by_interface(interface_id)?;
        self.stores.peers.delete_by_interface(interface_id)?;
        self.stores.allowed_emails.delete_by_interface(interface_id)?;
        self.stores.interfaces.delete(interface_id)?;
        self.locks.forget(interface_id);

        info!("Interface {} deleted with {} peers", interface_id, peers.len());
        Ok(())
    }

    // ========================================================================
    // Access grants
    // ========================================================================

    pub fn list_allowed_emails(&self, interface_id: &str) -> Result<Vec<AllowedEmail>> {
        self.interface_config(interface_id)?;
        self.stores.allowed_emails.list_by_interface(interface_id)
    }

    pub fn create_allowed_email(&self, interface_id: &str, email: &str) -> Result<()> {
        require(interface_id, "interface id")?;
        require(email, "email")?;
        self.interface_config(interface_id)?;
        self.stores.allowed_emails.create(interface_id, email.trim())?;
        info!("Granted {} access to {}", email.trim(), interface_id);
        Ok(())
    }

    pub fn delete_allowed_email(&self, interface_id: &str, email: &str) -> Result<()> {
        require(interface_id, "interface id")?;
        require(email, "email")?;
        self.interface_config(interface_id)?;
        if self.stores.allowed_emails.delete(interface_id, email.trim())? {
            info!("Revoked access of {} to {}", email.trim(), interface_id);
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn list_peers(&self, interface_id: Option<&str>) -> Result<Vec<PeerRecord>> {
        match interface_id.filter(|id| !id.is_empty()) {
            Some(id) => self.stores.peers.list_by_interface(id),
            None => self.stores.peers.list(),
        }
    }

    pub async fn list_peer_stats(&self, cancel: &CancellationToken) -> Result<Vec<PeerStat>> {
        self.repo.list_peer_stats(cancel).await
    }

    pub async fn get_firewall_rules(&self, cancel: &CancellationToken) -> Result<String> {
        self.repo.list_firewall_rules(cancel).await
    }

    pub async fn list_configs(
        &self,
        cancel: &CancellationToken,
        interface_id: Option<&str>,
    ) -> Result<Vec<InterfaceConfigDump>> {
        self.repo
            .list_configs(cancel, interface_id.filter(|id| !id.is_empty()))
            .await
    }

    // ========================================================================
    // Peers
    // ========================================================================

    /// Allocate and install a live peer, then sync its firewall rules.
    /// Callers hold the interface lock.
    async fn install_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer> {
        require(interface_id, "interface id")?;
        let config = self.interface_config(interface_id)?;
        let endpoint = if endpoint.trim().is_empty() {
            config.endpoint.as_str()
        } else {
            endpoint
        };

        let interface_routes = self.stores.interface_routes.list_by_interface(interface_id)?;
        let destinations = creation_destinations(allowed_ips, &interface_routes)?;

        let peer = self.repo.create_peer(cancel, interface_id, endpoint, &destinations).await?;

        if self.repo.capabilities().firewall {
            self.repo
                .sync_peer_firewall_rules(cancel, interface_id, &peer.allowed_ip, &destinations)
                .await?;
        }
        Ok(peer)
    }

    /// Create a live peer without recording it.
    pub async fn create_live_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer> {
        let _guard = self.locks.lock(interface_id).await;
        self.install_peer(cancel, interface_id, endpoint, allowed_ips).await
    }

    /// Create a live peer and record it without an owner.
    pub async fn create_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<PeerRecord> {
        let _guard = self.locks.lock(interface_id).await;
        let peer = self.install_peer(cancel, interface_id, endpoint, allowed_ips).await?;

        // Explicit destinations live on as peer routes so later resyncs keep them
        for cidr in allowed_ips.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            self.stores.peer_routes.create(&peer.id, cidr)?;
        }
        let record = PeerRecord::from_live("", &peer);
        self.stores.peers.create(&record)?;
        info!("Admin peer {} recorded on {}", record.peer_id, interface_id);
        Ok(record)
    }

    /// Remove a recorded peer: firewall rules, live peer, routes, record.
    pub async fn delete_peer(&self, cancel: &CancellationToken, peer_id: &str) -> Result<()> {
        require(peer_id, "peer id")?;
        let record = self.peer_record(peer_id)?;

        if self.repo.capabilities().firewall {
            self.repo.remove_peer_firewall_rules(cancel, &record.allowed_ip).await?;
        }
        self.repo.delete_peer(cancel, &record.peer_id).await?;
        self.stores.peer_routes.delete_by_peer(&record.peer_id)?;
        self.stores.peers.delete_by_peer_id(&record.peer_id)?;

        info!("Peer {} deleted from {}", record.peer_id, record.interface_id);
        Ok(())
    }

    /// Remove a live peer; its firewall rules go too when a record names its address.
    pub async fn delete_live_peer(&self, cancel: &CancellationToken, peer_id: &str) -> Result<()> {
        require(peer_id, "peer id")?;
        if self.repo.capabilities().firewall {
            if let Some(record) = self.stores.peers.get_by_peer_id(peer_id)? {
                self.repo.remove_peer_firewall_rules(cancel, &record.allowed_ip).await?;
            }
        }
        self.repo.delete_peer(cancel, peer_id).await
    }

    /// Push a full destination set to a live peer and mirror it into its record.
    pub async fn update_live_peer_allowed_ips(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_id: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        require(interface_id, "interface id")?;
        require(peer_id, "peer id")?;
        if allowed_ips.is_empty() {
            return Err(Error::validation("allowed IPs are required"));
        }

        self.repo
            .update_peer_allowed_ips(cancel, interface_id, peer_id, allowed_ips)
            .await?;

        let record = self.stores.peers.get_by_peer_id(peer_id)?;
        if self.repo.capabilities().firewall {
            // The peer's own address leads every effective set
            let own = record
                .as_ref()
                .map(|r| r.allowed_ip.as_str())
                .unwrap_or(allowed_ips[0].as_str());
            self.repo
                .sync_peer_firewall_rules(cancel, interface_id, own, allowed_ips)
                .await?;
        }

        if let Some(record) = record {
            self.sync.store_allowed_ips(&record, allowed_ips)?;
        }
        debug!("Peer {} destinations replaced", peer_id);
        Ok(())
    }

    // ========================================================================
    // Routes
    // ========================================================================

    pub fn list_interface_routes(&self, interface_id: &str) -> Result<Vec<InterfaceRoute>> {
        require(interface_id, "interface id")?;
        self.stores.interface_routes.list_by_interface(interface_id)
    }

    /// Add a route for every peer of the interface and re-push all of them.
    pub async fn create_interface_route(&self, cancel: &CancellationToken, interface_id: &str, cidr: &str) -> Result<()> {
        require(interface_id, "interface id")?;
        require(cidr, "cidr")?;
        validate_ipv4_cidr(cidr)?;
        self.interface_config(interface_id)?;

        let _guard = self.locks.lock(interface_id).await;
        self.stores.interface_routes.create(interface_id, cidr)?;
        let synced = self.sync.resync_interface(cancel, interface_id).await?;
        info!("Route {} added to {} ({} peers updated)", cidr, interface_id, synced);
        Ok(())
    }

    pub async fn delete_interface_route(&self, cancel: &CancellationToken, interface_id: &str, cidr: &str) -> Result<()> {
        require(interface_id, "interface id")?;
        require(cidr, "cidr")?;

        let _guard = self.locks.lock(interface_id).await;
        self.stores.interface_routes.delete(interface_id, cidr)?;
        let synced = self.sync.resync_interface(cancel, interface_id).await?;
        info!("Route {} removed from {} ({} peers updated)", cidr, interface_id, synced);
        Ok(())
    }

    pub fn list_peer_routes(&self, peer_id: &str) -> Result<Vec<PeerRoute>> {
        require(peer_id, "peer id")?;
        self.stores.peer_routes.list_by_peer(peer_id)
    }

    pub async fn create_peer_route(&self, cancel: &CancellationToken, peer_id: &str, cidr: &str) -> Result<()> {
        require(peer_id, "peer id")?;
        require(cidr, "cidr")?;
        validate_ipv4_cidr(cidr)?;
        let record = self.peer_record(peer_id)?;

        let _guard = self.locks.lock(&record.interface_id).await;
        self.stores.peer_routes.create(peer_id, cidr)?;
        self.resync_one(cancel, &record).await?;
        info!("Route {} added to peer {}", cidr, peer_id);
        Ok(())
    }

    pub async fn delete_peer_route(&self, cancel: &CancellationToken, peer_id: &str, cidr: &str) -> Result<()> {
        require(peer_id, "peer id")?;
        require(cidr, "cidr")?;
        let record = self.peer_record(peer_id)?;

        let _guard = self.locks.lock(&record.interface_id).await;
        self.stores.peer_routes.delete(peer_id, cidr)?;
        self.resync_one(cancel, &record).await?;
        info!("Route {} removed from peer {}", cidr, peer_id);
        Ok(())
    }

    async fn resync_one(&self, cancel: &CancellationToken, record: &PeerRecord) -> Result<()> {
        let interface_routes = self.stores.interface_routes.list_by_interface(&record.interface_id)?;
        self.sync.resync_peer(cancel, record, &interface_routes).await?;
        Ok(())
    }
}
