//! End-user operations
//!
//! A caller is identified by email. Interfaces are visible only through an
//! access grant, a caller owns at most one peer per interface, and every peer
//! operation checks that the caller owns the peer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wgplane_common::destinations::{creation_destinations, validate_ipv4_cidr};
use wgplane_common::{
    Error, InterfaceLocks, LiveInterface, PeerRecord, PeerRoute, PeerStatus, PeerSynchronizer, Repository, Result,
    Stores,
};

#[derive(Clone)]
pub struct SelfService {
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

impl SelfService {
    pub fn new(repo: Arc<dyn Repository>, stores: Stores, locks: InterfaceLocks) -> Self {
        let sync = PeerSynchronizer::new(repo.clone(), stores.clone());
        Self {
            repo,
            stores,
            locks,
            sync,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.repo.backend()
    }

    /// The peer `peer_id`, provided `email` owns it.
    fn owned_peer(&self, email: &str, peer_id: &str) -> Result<PeerRecord> {
        require(peer_id, "peer id")?;
        let record = self
            .stores
            .peers
            .get_by_peer_id(peer_id)?
            .ok_or_else(|| Error::not_found("peer", peer_id))?;
        if record.email != email {
            warn!(caller = email, peer = peer_id, "Peer access denied");
            return Err(Error::Forbidden(format!("peer {} belongs to another user", peer_id)));
        }
        Ok(record)
    }

    /// Live interfaces the caller was granted, with their administrator display names.
    pub async fn list_interfaces(&self, cancel: &CancellationToken, email: &str) -> Result<Vec<LiveInterface>> {
        let granted: HashSet<String> = self
            .stores
            .allowed_emails
            .list_interface_ids_by_email(email)?
            .into_iter()
            .collect();
        if granted.is_empty() {
            return Ok(Vec::new());
        }

        let names: HashMap<String, String> = self
            .stores
            .interfaces
            .list()?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let mut items = Vec::new();
        for mut iface in self.repo.list_interfaces(cancel).await? {
            if !granted.contains(&iface.id) {
                continue;
            }
            if let Some(name) = names.get(&iface.id).filter(|n| !n.is_empty()) {
                iface.name = name.clone();
            }
            items.push(iface);
        }
        Ok(items)
    }

    /// Traffic counters of the caller's peers.
    pub async fn list_peer_statuses(&self, cancel: &CancellationToken, email: &str) -> Result<Vec<PeerStatus>> {
        let mine: HashSet<String> = self
            .stores
            .peers
            .list_by_email(email)?
            .into_iter()
            .map(|p| p.peer_id)
            .collect();
        if mine.is_empty() {
            return Ok(Vec::new());
        }

        let names: HashMap<String, String> = self
            .stores
            .interfaces
            .list()?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let statuses = self
            .repo
            .list_peer_stats(cancel)
            .await?
            .into_iter()
            .filter(|s| mine.contains(&s.peer_id))
            .map(|s| PeerStatus {
                interface_name: names
                    .get(&s.interface_id)
                    .cloned()
                    .unwrap_or_else(|| s.interface_id.clone()),
                peer_id: s.peer_id,
                interface_id: s.interface_id,
                rx_bytes: s.rx_bytes,
                tx_bytes: s.tx_bytes,
                last_handshake_at: s.last_handshake_at,
            })
            .collect();
        Ok(statuses)
    }

    /// Create the caller's peer on a granted interface. Its destinations are the
    /// interface routes; anything more is added later as peer routes.
    pub async fn create_peer(&self, cancel: &CancellationToken, email: &str, interface_id: &str) -> Result<PeerRecord> {
        require(interface_id, "interface id")?;
        if !self.stores.allowed_emails.exists(interface_id, email)? {
            warn!(caller = email, interface = interface_id, "Peer creation denied");
            return Err(Error::Forbidden(format!("no access to interface {}", interface_id)));
        }

        let _guard = self.locks.lock(interface_id).await;
        if let Some(existing) = self.stores.peers.get_by_email_and_interface(email, interface_id)? {
            return Err(Error::already_exists("peer", existing.peer_id));
        }

        let endpoint = self
            .stores
            .interfaces
            .get(interface_id)?
            .map(|c| c.endpoint)
            .unwrap_or_default();
        let interface_routes = self.stores.interface_routes.list_by_interface(interface_id)?;
        let destinations = creation_destinations(&[], &interface_routes)?;

        let peer = self.repo.create_peer(cancel, interface_id, &endpoint, &destinations).await?;

        if self.repo.capabilities().firewall {
            self.repo
                .sync_peer_firewall_rules(cancel, interface_id, &peer.allowed_ip, &destinations)
                .await?;
        }

        let record = PeerRecord::from_live(email, &peer);
        self.stores.peers.create(&record)?;
        info!(
            caller = email,
            interface = interface_id,
            peer = %record.peer_id,
            address = %record.allowed_ip,
            "Self-service peer created"
        );
        Ok(record)
    }

    /// The caller's oldest peer.
    pub fn get_peer(&self, email: &str) -> Result<PeerRecord> {
        let record = self
            .stores
            .peers
            .get_by_email(email)?
            .ok_or_else(|| Error::not_found("peer", email))?;
        self.still_granted(email, record)
    }

    pub fn get_peer_by_interface(&self, email: &str, interface_id: &str) -> Result<PeerRecord> {
        require(interface_id, "interface id")?;
        let record = self
            .stores
            .peers
            .get_by_email_and_interface(email, interface_id)?
            .ok_or_else(|| Error::not_found("peer", format!("{} on {}", email, interface_id)))?;
        self.still_granted(email, record)
    }

    /// Hide a peer's config once the caller's grant on its interface is revoked.
    fn still_granted(&self, email: &str, record: PeerRecord) -> Result<PeerRecord> {
        if !self.stores.allowed_emails.exists(&record.interface_id, email)? {
            warn!(caller = email, interface = %record.interface_id, "Peer read denied");
            return Err(Error::Forbidden(format!(
                "no access to interface {}",
                record.interface_id
            )));
        }
        Ok(record)
    }

    /// Remove one of the caller's peers: firewall rules, live peer, routes, record.
    pub async fn delete_peer(&self, cancel: &CancellationToken, email: &str, peer_id: &str) -> Result<()> {
        let record = self.owned_peer(email, peer_id)?;
        let _guard = self.locks.lock(&record.interface_id).await;

        if self.repo.capabilities().firewall {
            self.repo.remove_peer_firewall_rules(cancel, &record.allowed_ip).await?;
        }
        self.repo.delete_peer(cancel, &record.peer_id).await?;
        self.stores.peer_routes.delete_by_peer(&record.peer_id)?;
        self.stores.peers.delete_by_peer_id(&record.peer_id)?;

        info!(caller = email, peer = %record.peer_id, "Self-service peer deleted");
        Ok(())
    }

    pub fn list_peer_routes(&self, email: &str, peer_id: &str) -> Result<Vec<PeerRoute>> {
        let record = self.owned_peer(email, peer_id)?;
        self.stores.peer_routes.list_by_peer(&record.peer_id)
    }

    pub async fn create_peer_route(
        &self,
        cancel: &CancellationToken,
        email: &str,
        peer_id: &str,
        cidr: &str,
    ) -> Result<()> {
        require(cidr, "cidr")?;
        validate_ipv4_cidr(cidr)?;
        let record = self.owned_peer(email, peer_id)?;

        let _guard = self.locks.lock(&record.interface_id).await;
        self.stores.peer_routes.create(&record.peer_id, cidr)?;
        self.resync(cancel, &record).await
    }

    pub async fn delete_peer_route(
        &self,
        cancel: &CancellationToken,
        email: &str,
        peer_id: &str,
        cidr: &str,
    ) -> Result<()> {
        require(cidr, "cidr")?;
        let record = self.owned_peer(email, peer_id)?;

        let _guard = self.locks.lock(&record.interface_id).await;
        self.stores.peer_routes.delete(&record.peer_id, cidr)?;
        self.resync(cancel, &record).await
    }

    async fn resync(&self, cancel: &CancellationToken, record: &PeerRecord) -> Result<()> {
        let interface_routes = self.stores.interface_routes.list_by_interface(&record.interface_id)?;
        let allowed_ips = self.sync.resync_peer(cancel, record, &interface_routes).await?;
        info!(peer = %record.peer_id, "Peer destinations set to {}", allowed_ips.join(","));
        Ok(())
    }
}
