//! Administrator scenarios over HTTP against a fake host

use serde_json::json;
use std::sync::Arc;
use wgplane_common::rpc::{admin, Empty};
use wgplane_common::testing::FakeHost;
use wgplane_common::{AdminInterface, PeerRecord};
use wgplane_e2e::{ApiClient, DaemonHandle};

fn wg0() -> serde_json::Value {
    json!({
        "config": {
            "id": "wg0",
            "name": "office",
            "address": "10.0.0.1/24",
            "listen_port": 51820,
            "mtu": 1420,
            "endpoint": "vpn.example.com"
        }
    })
}

async fn create_peer(client: &ApiClient) -> PeerRecord {
    client
        .call(admin::CREATE_PEER, &json!({ "interface_id": "wg0" }))
        .await
        .unwrap()
}

/// Addresses are handed out lowest first and reused after deletion.
#[tokio::test]
async fn peer_addresses_are_allocated_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let daemon = DaemonHandle::spawn(host.clone(), dir.path()).await.unwrap();
    let client = ApiClient::admin(&daemon.base_url);

    let iface: AdminInterface = client.call(admin::CREATE_INTERFACE, &wg0()).await.unwrap();
    assert_eq!(iface.address, "10.0.0.1/24");
    assert_eq!(Some(iface.public_key.clone()), host.public_key("wg0"));

    let first = create_peer(&client).await;
    let second = create_peer(&client).await;
    assert_eq!(first.allowed_ip, "10.0.0.2/32");
    assert_eq!(second.allowed_ip, "10.0.0.3/32");

    let _: Empty = client
        .call(admin::DELETE_PEER, &json!({ "peer_id": first.peer_id }))
        .await
        .unwrap();
    let third = create_peer(&client).await;
    assert_eq!(third.allowed_ip, "10.0.0.2/32");

    assert_eq!(host.peer_ids("wg0").len(), 2);
    let peers: Vec<PeerRecord> = client.call(admin::LIST_PEERS, &json!({ "interface_id": "wg0" })).await.unwrap();
    assert_eq!(peers.len(), 2);
}

/// An interface route reaches every peer, live and stored.
#[tokio::test]
async fn interface_route_fans_out_to_every_peer() {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let daemon = DaemonHandle::spawn(host.clone(), dir.path()).await.unwrap();
    let client = ApiClient::admin(&daemon.base_url);

    let _: AdminInterface = client.call(admin::CREATE_INTERFACE, &wg0()).await.unwrap();
    let a = create_peer(&client).await;
    let b = create_peer(&client).await;

    let _: Empty = client
        .call(
            admin::CREATE_INTERFACE_ROUTE,
            &json!({ "interface_id": "wg0", "cidr": "10.8.0.0/16" }),
        )
        .await
        .unwrap();

    let stored: Vec<PeerRecord> = client.call(admin::LIST_PEERS, &json!({})).await.unwrap();
    for peer in [&a, &b] {
        assert_eq!(
            host.peer_allowed_ips("wg0", &peer.peer_id),
            Some(vec![peer.allowed_ip.clone(), "10.8.0.0/16".to_string()])
        );
        let record = stored.iter().find(|r| r.peer_id == peer.peer_id).unwrap();
        assert!(record
            .config
            .contains(&format!("AllowedIPs = {}, 10.8.0.0/16", peer.allowed_ip)));
    }

    let rules = host.chain_rules("WGPLANE_FWD");
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| r.contains("-d 10.8.0.0/16 -i wg0 -j ACCEPT")));
}

/// Deleting an interface removes its peers, routes, grants and rules.
#[tokio::test]
async fn interface_deletion_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let daemon = DaemonHandle::spawn(host.clone(), dir.path()).await.unwrap();
    let client = ApiClient::admin(&daemon.base_url);

    let _: AdminInterface = client.call(admin::CREATE_INTERFACE, &wg0()).await.unwrap();
    let _: Empty = client
        .call(
            admin::CREATE_ALLOWED_EMAIL,
            &json!({ "interface_id": "wg0", "email": "alice@example.com" }),
        )
        .await
        .unwrap();
    let _: Empty = client
        .call(
            admin::CREATE_INTERFACE_ROUTE,
            &json!({ "interface_id": "wg0", "cidr": "10.8.0.0/16" }),
        )
        .await
        .unwrap();
    create_peer(&client).await;

    let _: Empty = client
        .call(admin::DELETE_INTERFACE, &json!({ "interface_id": "wg0" }))
        .await
        .unwrap();

    assert!(host.interface_names().is_empty());
    assert!(host.chain_rules("WGPLANE_FWD").is_empty());

    let err = client
        .call::<_, Vec<serde_json::Value>>(admin::LIST_ALLOWED_EMAILS, &json!({ "interface_id": "wg0" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("not_found"));

    let stores = daemon.state.stores();
    assert!(stores.peers.list().unwrap().is_empty());
    assert!(stores.interface_routes.list_by_interface("wg0").unwrap().is_empty());
}
