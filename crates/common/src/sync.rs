//! Pushing stored destination sets to live peers
//!
//! A stored peer's effective destinations are its own address, the interface
//! routes and its peer routes. Re-syncing a peer pushes that set to the live
//! peer, rebuilds its firewall rules when the backend manages the firewall,
//! and rewrites the `AllowedIPs` line of its stored client config.

use crate::destinations::effective_destinations;
use crate::peer_config::rewrite_allowed_ips;
use crate::repository::Repository;
use crate::store::Stores;
use crate::types::*;
use crate::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct PeerSynchronizer {
    repo: Arc<dyn Repository>,
    stores: Stores,
}

impl PeerSynchronizer {
    pub fn new(repo: Arc<dyn Repository>, stores: Stores) -> Self {
        Self { repo, stores }
    }

    /// Re-push one stored peer given the current routes of its interface.
    pub async fn resync_peer(
        &self,
        cancel: &CancellationToken,
        peer: &PeerRecord,
        interface_routes: &[InterfaceRoute],
    ) -> Result<Vec<String>> {
        let peer_routes = self.stores.peer_routes.list_by_peer(&peer.peer_id)?;
        let allowed_ips = effective_destinations(&peer.allowed_ip, interface_routes, &peer_routes);

        self.repo
            .update_peer_allowed_ips(cancel, &peer.interface_id, &peer.peer_id, &allowed_ips)
            .await?;

        if self.repo.capabilities().firewall {
            self.repo
                .sync_peer_firewall_rules(cancel, &peer.interface_id, &peer.allowed_ip, &allowed_ips)
                .await?;
        }

        self.store_allowed_ips(peer, &allowed_ips)?;
        Ok(allowed_ips)
    }

    /// Re-push every stored peer of an interface, in store order.
    ///
    /// Stops at the first failure; peers handled before it keep their new
    /// destination set.
    pub async fn resync_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<usize> {
        let interface_routes = self.stores.interface_routes.list_by_interface(interface_id)?;
        let peers = self.stores.peers.list_by_interface(interface_id)?;

        for peer in &peers {
            let allowed_ips = self.resync_peer(cancel, peer, &interface_routes).await?;
            info!(
                interface = interface_id,
                peer = %peer.peer_id,
                "Peer destinations set to {}",
                allowed_ips.join(",")
            );
        }
        Ok(peers.len())
    }

    /// Rewrite the stored config of `peer` when its destinations changed.
    pub fn store_allowed_ips(&self, peer: &PeerRecord, allowed_ips: &[String]) -> Result<()> {
        let updated = rewrite_allowed_ips(&peer.config, allowed_ips);
        if updated.is_empty() || updated == peer.config {
            return Ok(());
        }
        self.stores.peers.update_config(&peer.peer_id, &updated)
    }
}
