//! Self-service server delegating live changes to the daemon over HTTP

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wgplane_common::repository::DelegatingRepository;
use wgplane_common::rpc::{admin, api, Empty};
use wgplane_common::testing::FakeHost;
use wgplane_common::{AdminInterface, Error, LiveInterface, PeerRecord, Repository};
use wgplane_e2e::{ApiClient, DaemonHandle, WebHandle};

const HEADER: &str = "X-Email";
const ALICE: &str = "alice@example.com";

struct Setup {
    _dir: tempfile::TempDir,
    host: Arc<FakeHost>,
    daemon: DaemonHandle,
    web: WebHandle,
}

/// Daemon with wg0 granted to alice, and a self-service server in front of it
async fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let daemon = DaemonHandle::spawn(host.clone(), dir.path()).await.unwrap();
    let admin_client = ApiClient::admin(&daemon.base_url);

    let _: AdminInterface = admin_client
        .call(
            admin::CREATE_INTERFACE,
            &json!({
                "config": {
                    "id": "wg0",
                    "name": "office",
                    "address": "10.0.0.1/24",
                    "listen_port": 51820,
                    "mtu": 1420,
                    "endpoint": "vpn.example.com"
                }
            }),
        )
        .await
        .unwrap();
    let _: Empty = admin_client
        .call(admin::CREATE_ALLOWED_EMAIL, &json!({ "interface_id": "wg0", "email": ALICE }))
        .await
        .unwrap();

    let web = WebHandle::spawn(&daemon.base_url, &daemon.db_path(), HEADER).await.unwrap();
    Setup {
        _dir: dir,
        host,
        daemon,
        web,
    }
}

#[tokio::test]
async fn self_service_peer_goes_through_daemon() {
    let s = setup().await;
    let alice = ApiClient::user(&s.web.base_url, HEADER, ALICE);

    let interfaces: Vec<LiveInterface> = alice.call(api::LIST_INTERFACES, &json!({})).await.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].name, "office");

    let _: Empty = ApiClient::admin(&s.daemon.base_url)
        .call(
            admin::CREATE_INTERFACE_ROUTE,
            &json!({ "interface_id": "wg0", "cidr": "192.168.10.0/24" }),
        )
        .await
        .unwrap();

    // Destinations come from the routes, never from the caller
    let peer: PeerRecord = alice
        .call(
            api::CREATE_PEER,
            &json!({ "interface_id": "wg0", "allowed_ips": ["0.0.0.0/0"] }),
        )
        .await
        .unwrap();
    assert_eq!(peer.email, ALICE);
    assert_eq!(peer.allowed_ip, "10.0.0.2/32");
    assert!(peer.config.contains("Endpoint = vpn.example.com:51820"));

    assert_eq!(
        s.host.peer_allowed_ips("wg0", &peer.peer_id),
        Some(vec!["10.0.0.2/32".to_string(), "192.168.10.0/24".to_string()])
    );
    // The daemon installs the rules; the delegating side never touches the firewall
    assert_eq!(
        s.host.chain_rules("WGPLANE_FWD"),
        vec!["-A WGPLANE_FWD -s 10.0.0.2/32 -d 192.168.10.0/24 -i wg0 -j ACCEPT".to_string()]
    );

    let _: Empty = alice
        .call(
            api::CREATE_PEER_ROUTE,
            &json!({ "peer_id": peer.peer_id, "cidr": "172.16.0.0/12" }),
        )
        .await
        .unwrap();
    assert_eq!(
        s.host.peer_allowed_ips("wg0", &peer.peer_id),
        Some(vec![
            "10.0.0.2/32".to_string(),
            "192.168.10.0/24".to_string(),
            "172.16.0.0/12".to_string()
        ])
    );
    assert_eq!(s.host.chain_rules("WGPLANE_FWD").len(), 2);

    let _: Empty = alice
        .call(api::DELETE_PEER, &json!({ "peer_id": peer.peer_id }))
        .await
        .unwrap();
    assert!(s.host.peer_ids("wg0").is_empty());
    assert!(s.host.chain_rules("WGPLANE_FWD").is_empty());
    assert!(s.web.stores.peers.list().unwrap().is_empty());
}

#[tokio::test]
async fn ungranted_caller_creates_nothing() {
    let s = setup().await;
    let bob = ApiClient::user(&s.web.base_url, HEADER, "bob@example.com");

    let interfaces: Vec<LiveInterface> = bob.call(api::LIST_INTERFACES, &json!({})).await.unwrap();
    assert!(interfaces.is_empty());

    let err = bob
        .call::<_, PeerRecord>(api::CREATE_PEER, &json!({ "interface_id": "wg0" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("forbidden"));
    assert!(s.host.peer_ids("wg0").is_empty());
    assert!(s.web.stores.peers.list().unwrap().is_empty());

    let anonymous = ApiClient::anonymous(&s.web.base_url);
    let err = anonymous
        .call::<_, Vec<LiveInterface>>(api::LIST_INTERFACES, &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("unauthenticated"));
}

#[tokio::test]
async fn foreign_peer_cannot_be_touched() {
    let s = setup().await;
    let alice = ApiClient::user(&s.web.base_url, HEADER, ALICE);
    let mallory = ApiClient::user(&s.web.base_url, HEADER, "mallory@example.com");

    let peer: PeerRecord = alice
        .call(api::CREATE_PEER, &json!({ "interface_id": "wg0" }))
        .await
        .unwrap();

    let err = mallory
        .call::<_, Empty>(api::DELETE_PEER, &json!({ "peer_id": peer.peer_id }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("forbidden"));
    assert_eq!(s.host.peer_ids("wg0"), vec![peer.peer_id.clone()]);
}

#[tokio::test]
async fn error_classes_survive_the_hop() {
    let s = setup().await;
    let repo = DelegatingRepository::new(s.daemon.base_url.clone(), Duration::from_secs(5)).unwrap();
    let cancel = CancellationToken::new();

    let err = repo.get_interface(&cancel, "wg9").await.unwrap_err();
    assert!(err.is_not_found());

    let err = repo
        .delete_peer(&cancel, "bm90LWEtcmVhbC1wZWVyLWtleS8rPQ==")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = repo
        .update_peer_allowed_ips(&cancel, "wg0", "some-peer", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = repo.ensure_firewall_chain(&cancel).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    assert!(repo.list_peer_stats(&cancel).await.unwrap().is_empty());
    let ifaces = repo.list_interfaces(&cancel).await.unwrap();
    assert_eq!(ifaces.len(), 1);
    assert_eq!(ifaces[0].id, "wg0");
}
