//! Restart convergence: state built through the admin API is rebuilt from the
//! database on a host that lost or scrambled it.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wgplane_common::repository::{CommandRepository, FirewallConfig};
use wgplane_common::rpc::{admin, Empty};
use wgplane_common::testing::FakeHost;
use wgplane_common::{AdminInterface, Database, PeerRecord, Stores};
use wgplane_daemon::Reconciler;
use wgplane_e2e::{ApiClient, DaemonHandle};

fn interface(id: &str, address: &str, port: u32) -> serde_json::Value {
    json!({
        "config": {
            "id": id,
            "name": format!("{} site", id),
            "address": address,
            "listen_port": port,
            "mtu": 1420,
            "endpoint": "vpn.example.com"
        }
    })
}

#[tokio::test]
async fn bootstrap_rebuilds_live_state_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let before = Arc::new(FakeHost::new());
    let daemon = DaemonHandle::spawn(before.clone(), dir.path()).await.unwrap();
    let client = ApiClient::admin(&daemon.base_url);

    let _: AdminInterface = client.call(admin::CREATE_INTERFACE, &interface("wg0", "10.0.0.1/24", 51820)).await.unwrap();
    let _: AdminInterface = client.call(admin::CREATE_INTERFACE, &interface("wg1", "10.1.0.1/24", 51821)).await.unwrap();
    let _: Empty = client
        .call(
            admin::CREATE_INTERFACE_ROUTE,
            &json!({ "interface_id": "wg0", "cidr": "10.8.0.0/16" }),
        )
        .await
        .unwrap();

    let mut peers = Vec::new();
    for iface in ["wg0", "wg0", "wg1"] {
        let peer: PeerRecord = client
            .call(admin::CREATE_PEER, &json!({ "interface_id": iface }))
            .await
            .unwrap();
        peers.push(peer);
    }
    let _: Empty = client
        .call(
            admin::CREATE_PEER_ROUTE,
            &json!({ "peer_id": peers[2].peer_id, "cidr": "172.16.0.0/12" }),
        )
        .await
        .unwrap();
    let db_path = daemon.db_path();
    drop(daemon);

    // The host after a reboot: wg0 came back half configured, and an
    // unrelated management tunnel is running
    let after = Arc::new(FakeHost::new());
    after.add_interface("wg0", "10.0.0.1/24", 51820);
    after.add_peer("wg0", "stale-peer", &["10.0.0.99/32"]);
    after.add_interface("wg-mgmt", "192.168.250.1/24", 51999);

    let stores = Stores::new(&Database::open(&db_path).unwrap());
    let repo = Arc::new(CommandRepository::new(after.clone(), FirewallConfig::default()));
    let reconciler = Reconciler::new(repo, stores.clone(), vec!["wg-mgmt".to_string()]);
    let report = reconciler.bootstrap(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.interfaces, 2);
    assert_eq!(report.peers, 3);

    assert_eq!(after.is_up("wg-mgmt"), Some(true));
    assert_eq!(after.peer_allowed_ips("wg0", "stale-peer"), None);

    assert_eq!(
        after.peer_allowed_ips("wg0", &peers[0].peer_id),
        Some(vec![peers[0].allowed_ip.clone(), "10.8.0.0/16".to_string()])
    );
    assert_eq!(
        after.peer_allowed_ips("wg0", &peers[1].peer_id),
        Some(vec![peers[1].allowed_ip.clone(), "10.8.0.0/16".to_string()])
    );
    assert_eq!(
        after.peer_allowed_ips("wg1", &peers[2].peer_id),
        Some(vec![peers[2].allowed_ip.clone(), "172.16.0.0/12".to_string()])
    );
    assert_eq!(after.chain_rules("WGPLANE_FWD").len(), 3);

    // Interface keys are regenerated on every bootstrap
    assert_ne!(after.public_key("wg0"), before.public_key("wg0"));
}
