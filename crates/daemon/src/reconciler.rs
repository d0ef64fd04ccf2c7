//! Startup reconciliation
//!
//! Rebuilds live WireGuard and firewall state from the database before the
//! daemon serves anything. Interfaces not named in the exclusion list are
//! brought down, every stored interface is recreated, and every stored peer
//! gets its effective destination set pushed again.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wgplane_common::repository::CommandRepository;
use wgplane_common::{PeerSynchronizer, Repository, Result, Stores};

/// Bootstrap counters, for the startup log line
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub downed: usize,
    pub interfaces: usize,
    pub peers: usize,
}

pub struct Reconciler {
    repo: Arc<CommandRepository>,
    stores: Stores,
    sync: PeerSynchronizer,
    excluded: HashSet<String>,
}

impl Reconciler {
    pub fn new(repo: Arc<CommandRepository>, stores: Stores, excluded: impl IntoIterator<Item = String>) -> Self {
        let sync = PeerSynchronizer::new(repo.clone(), stores.clone());
        Self {
            repo,
            stores,
            sync,
            excluded: excluded.into_iter().collect(),
        }
    }

    /// Run once. Any error aborts; the caller decides whether it is fatal.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        info!("Bootstrap started ({} excluded interfaces)", self.excluded.len());

        let live = self.repo.list_interface_names(cancel).await?;
        for name in &live {
            if self.excluded.contains(name) {
                debug!("Leaving excluded interface {} alone", name);
                continue;
            }
            self.repo.set_link_down(cancel, name).await?;
            report.downed += 1;
        }

        let configs = self.stores.interfaces.list()?;
        for config in &configs {
            if live.contains(&config.id) {
                self.repo.delete_interface(cancel, &config.id).await?;
            }
            let iface = self.repo.create_interface(cancel, config).await?;
            info!("Interface {} rebuilt at {} ({})", iface.id, iface.address, iface.public_key);
            report.interfaces += 1;
        }

        self.repo.ensure_firewall_chain(cancel).await?;
        self.repo.firewall().flush(cancel).await?;

        for config in &configs {
            let interface_routes = self.stores.interface_routes.list_by_interface(&config.id)?;
            for peer in self.stores.peers.list_by_interface(&config.id)? {
                let allowed_ips = self.sync.resync_peer(cancel, &peer, &interface_routes).await?;
                info!(
                    interface = %config.id,
                    peer = %peer.peer_id,
                    "Peer restored with {}",
                    allowed_ips.join(",")
                );
                report.peers += 1;
            }
        }

        info!(
            "Bootstrap finished: {} interfaces down, {} rebuilt, {} peers restored",
            report.downed, report.interfaces, report.peers
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgplane_common::repository::FirewallConfig;
    use wgplane_common::testing::FakeHost;
    use wgplane_common::{Database, Error, InterfaceConfig, PeerRecord};

    fn config(id: &str, address: &str, port: u32) -> InterfaceConfig {
        InterfaceConfig {
            id: id.into(),
            name: format!("{} site", id),
            address: address.into(),
            listen_port: port,
            mtu: 1420,
            endpoint: "vpn.example.com".into(),
        }
    }

    fn record(email: &str, peer_id: &str, interface_id: &str, allowed_ip: &str) -> PeerRecord {
        PeerRecord {
            email: email.into(),
            peer_id: peer_id.into(),
            interface_id: interface_id.into(),
            allowed_ip: allowed_ip.into(),
            config: format!("[Interface]\nAddress = {}\n\n[Peer]\nAllowedIPs = {}\n", allowed_ip, allowed_ip),
            created_at: 0,
        }
    }

    struct Fixture {
        host: Arc<FakeHost>,
        stores: Stores,
        repo: Arc<CommandRepository>,
    }

    /// Two stored interfaces, three stored peers and a handful of routes
    fn fixture() -> Fixture {
        let host = Arc::new(FakeHost::new());
        let repo = Arc::new(CommandRepository::new(host.clone(), FirewallConfig::default()));
        let stores = Stores::new(&Database::open_memory().unwrap());

        stores.interfaces.create(&config("wg0", "10.0.0.1/24", 51820)).unwrap();
        stores.interfaces.create(&config("wg1", "10.1.0.1/24", 51821)).unwrap();
        stores.peers.create(&record("a@example.com", "peerA", "wg0", "10.0.0.2/32")).unwrap();
        stores.peers.create(&record("b@example.com", "peerB", "wg0", "10.0.0.3/32")).unwrap();
        stores.peers.create(&record("c@example.com", "peerC", "wg1", "10.1.0.2/32")).unwrap();
        stores.interface_routes.create("wg0", "10.8.0.0/16").unwrap();
        stores.peer_routes.create("peerB", "172.16.0.0/12").unwrap();

        Fixture { host, stores, repo }
    }

    #[tokio::test]
    async fn test_bootstrap_converges() {
        let f = fixture();
        // Stale state from a previous run
        f.host.add_interface("wg0", "10.0.0.1/24", 51820);
        f.host.add_peer("wg0", "peerA", &["10.0.0.2/32", "192.168.99.0/24"]);
        f.host.add_peer("wg0", "ghost", &["10.0.0.77/32"]);

        let reconciler = Reconciler::new(f.repo.clone(), f.stores.clone(), Vec::new());
        let report = reconciler.bootstrap(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.interfaces, 2);
        assert_eq!(report.peers, 3);

        assert_eq!(f.host.interface_names(), vec!["wg0".to_string(), "wg1".to_string()]);
        assert_eq!(f.host.is_up("wg0"), Some(true));
        assert_eq!(f.host.peer_ids("wg0").len(), 2);
        assert_eq!(
            f.host.peer_allowed_ips("wg0", "peerA"),
            Some(vec!["10.0.0.2/32".to_string(), "10.8.0.0/16".to_string()])
        );
        assert_eq!(
            f.host.peer_allowed_ips("wg0", "peerB"),
            Some(vec![
                "10.0.0.3/32".to_string(),
                "10.8.0.0/16".to_string(),
                "172.16.0.0/12".to_string()
            ])
        );
        assert_eq!(f.host.peer_allowed_ips("wg1", "peerC"), Some(vec!["10.1.0.2/32".to_string()]));
        assert_eq!(f.host.peer_allowed_ips("wg0", "ghost"), None);

        let rules = f.host.chain_rules("WGPLANE_FWD");
        assert_eq!(rules.len(), 3);
        assert!(rules.contains(&"-A WGPLANE_FWD -s 10.0.0.3/32 -d 172.16.0.0/12 -i wg0 -j ACCEPT".to_string()));

        let stored = f.stores.peers.get_by_peer_id("peerB").unwrap().unwrap();
        assert!(stored.config.contains("AllowedIPs = 10.0.0.3/32, 10.8.0.0/16, 172.16.0.0/12"));
    }

    #[tokio::test]
    async fn test_excluded_interface_stays_up() {
        let f = fixture();
        f.host.add_interface("wg-mgmt", "192.168.200.1/24", 51999);
        f.host.add_interface("wg-stray", "192.168.201.1/24", 51998);

        let reconciler = Reconciler::new(f.repo.clone(), f.stores.clone(), vec!["wg-mgmt".to_string()]);
        let report = reconciler.bootstrap(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.downed, 1);

        assert_eq!(f.host.is_up("wg-mgmt"), Some(true));
        assert_eq!(f.host.is_up("wg-stray"), Some(false));
        assert!(!f
            .host
            .commands()
            .iter()
            .any(|c| c.contains("dev wg-mgmt")));
    }

    #[tokio::test]
    async fn test_bootstrap_is_repeatable() {
        let f = fixture();
        let reconciler = Reconciler::new(f.repo.clone(), f.stores.clone(), Vec::new());
        let cancel = CancellationToken::new();

        reconciler.bootstrap(&cancel).await.unwrap();
        let first_rules = f.host.chain_rules("WGPLANE_FWD");
        reconciler.bootstrap(&cancel).await.unwrap();

        assert_eq!(f.host.chain_rules("WGPLANE_FWD"), first_rules);
        assert_eq!(f.host.chain_rules("FORWARD"), vec!["-A FORWARD -j WGPLANE_FWD".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_reported() {
        let f = fixture();
        f.host.fail_on("wg set wg1 peer");

        let reconciler = Reconciler::new(f.repo.clone(), f.stores.clone(), Vec::new());
        let err = reconciler.bootstrap(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_bootstrap_cancelled() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reconciler = Reconciler::new(f.repo.clone(), f.stores.clone(), Vec::new());
        let err = reconciler.bootstrap(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
