//! HTTP surfaces of the daemon
//!
//! `/admin/v1/*` serves the administrator operations. `/live/v1/*` serves the
//! repository contract to self-service servers running the delegating backend.
//! Both are JSON POST only; errors come back as `ErrorBody` with a mapped status.

use crate::state::DaemonState;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::info;
use wgplane_common::rpc::{self, admin as ops, live, Empty};
use wgplane_common::{
    AdminInterface, AllowedEmail, InterfaceConfigDump, InterfaceRoute, LiveInterface, LivePeer, PeerRecord, PeerRoute,
    PeerStat, Result, VERSION,
};

/// Token for one request; cancelled when the handler future is dropped
/// (client gone, server shutting down).
fn request_token() -> (CancellationToken, DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

/// Both surfaces plus a health check
pub fn router(state: DaemonState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest(rpc::ADMIN_PREFIX, admin_router())
        .nest(rpc::LIVE_PREFIX, live_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Administrator operations
pub fn admin_router() -> Router<DaemonState> {
    Router::new()
        .route(&op(ops::LIST_INTERFACES), post(admin_list_interfaces))
        .route(&op(ops::GET_INTERFACE), post(admin_get_interface))
        .route(&op(ops::CREATE_INTERFACE), post(admin_create_interface))
        .route(&op(ops::UPDATE_INTERFACE), post(admin_update_interface))
        .route(&op(ops::DELETE_INTERFACE), post(admin_delete_interface))
        .route(&op(ops::LIST_ALLOWED_EMAILS), post(admin_list_allowed_emails))
        .route(&op(ops::CREATE_ALLOWED_EMAIL), post(admin_create_allowed_email))
        .route(&op(ops::DELETE_ALLOWED_EMAIL), post(admin_delete_allowed_email))
        .route(&op(ops::LIST_PEERS), post(admin_list_peers))
        .route(&op(ops::CREATE_PEER), post(admin_create_peer))
        .route(&op(ops::DELETE_PEER), post(admin_delete_peer))
        .route(&op(ops::LIST_PEER_STATS), post(list_peer_stats))
        .route(&op(ops::GET_FIREWALL_RULES), post(list_firewall_rules))
        .route(&op(ops::LIST_WIREGUARD_CONFIGS), post(list_configs))
        .route(&op(ops::LIST_INTERFACE_ROUTES), post(admin_list_interface_routes))
        .route(&op(ops::CREATE_INTERFACE_ROUTE), post(admin_create_interface_route))
        .route(&op(ops::DELETE_INTERFACE_ROUTE), post(admin_delete_interface_route))
        .route(&op(ops::LIST_PEER_ROUTES), post(admin_list_peer_routes))
        .route(&op(ops::CREATE_PEER_ROUTE), post(admin_create_peer_route))
        .route(&op(ops::DELETE_PEER_ROUTE), post(admin_delete_peer_route))
}

/// Repository contract for delegating callers
pub fn live_router() -> Router<DaemonState> {
    Router::new()
        .route(&op(live::LIST_INTERFACES), post(live_list_interfaces))
        .route(&op(live::GET_INTERFACE), post(live_get_interface))
        .route(&op(live::CREATE_INTERFACE), post(live_create_interface))
        .route(&op(live::UPDATE_INTERFACE), post(live_update_interface))
        .route(&op(live::DELETE_INTERFACE), post(admin_delete_interface))
        .route(&op(live::CREATE_PEER), post(live_create_peer))
        .route(&op(live::UPDATE_PEER_ALLOWED_IPS), post(live_update_peer_allowed_ips))
        .route(&op(live::DELETE_PEER), post(live_delete_peer))
        .route(&op(live::LIST_PEER_STATS), post(list_peer_stats))
        .route(&op(live::LIST_CONFIGS), post(list_configs))
        .route(&op(live::LIST_FIREWALL_RULES), post(list_firewall_rules))
}

fn op(name: &str) -> String {
    format!("/{}", name)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(listener: tokio::net::TcpListener, state: DaemonState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Daemon listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ============================================================================
// Shared handlers
// ============================================================================

async fn health_handler(State(state): State<DaemonState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wgplaned",
        "version": VERSION,
        "backend": state.repo().backend(),
    }))
}

async fn list_peer_stats(State(state): State<DaemonState>, Json(_): Json<Empty>) -> Result<Json<Vec<PeerStat>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().list_peer_stats(&cancel).await?))
}

async fn list_firewall_rules(
    State(state): State<DaemonState>,
    Json(_): Json<Empty>,
) -> Result<Json<rpc::FirewallRulesResponse>> {
    let (cancel, _guard) = request_token();
    let rules = state.admin().get_firewall_rules(&cancel).await?;
    Ok(Json(rpc::FirewallRulesResponse { rules }))
}

async fn list_configs(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::OptionalInterfaceRequest>,
) -> Result<Json<Vec<InterfaceConfigDump>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().list_configs(&cancel, req.interface_id.as_deref()).await?))
}

// ============================================================================
// Admin handlers
// ============================================================================

async fn admin_list_interfaces(
    State(state): State<DaemonState>,
    Json(_): Json<Empty>,
) -> Result<Json<Vec<AdminInterface>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().list_interfaces(&cancel).await?))
}

async fn admin_get_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<AdminInterface>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().get_interface(&cancel, &req.interface_id).await?))
}

async fn admin_create_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceConfigRequest>,
) -> Result<Json<AdminInterface>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().create_interface(&cancel, req.config).await?))
}

async fn admin_update_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceConfigRequest>,
) -> Result<Json<AdminInterface>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.admin().update_interface(&cancel, req.config).await?))
}

async fn admin_delete_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state.admin().delete_interface(&cancel, &req.interface_id).await?;
    Ok(Json(Empty {}))
}

async fn admin_list_allowed_emails(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<Vec<AllowedEmail>>> {
    Ok(Json(state.admin().list_allowed_emails(&req.interface_id)?))
}

async fn admin_create_allowed_email(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::EmailRequest>,
) -> Result<Json<Empty>> {
    state.admin().create_allowed_email(&req.interface_id, &req.email)?;
    Ok(Json(Empty {}))
}

async fn admin_delete_allowed_email(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::EmailRequest>,
) -> Result<Json<Empty>> {
    state.admin().delete_allowed_email(&req.interface_id, &req.email)?;
    Ok(Json(Empty {}))
}

async fn admin_list_peers(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::OptionalInterfaceRequest>,
) -> Result<Json<Vec<PeerRecord>>> {
    Ok(Json(state.admin().list_peers(req.interface_id.as_deref())?))
}

async fn admin_create_peer(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::CreatePeerRequest>,
) -> Result<Json<PeerRecord>> {
    let (cancel, _guard) = request_token();
    let record = state
        .admin()
        .create_peer(&cancel, &req.interface_id, &req.endpoint, &req.allowed_ips)
        .await?;
    Ok(Json(record))
}

async fn admin_delete_peer(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::PeerIdRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state.admin().delete_peer(&cancel, &req.peer_id).await?;
    Ok(Json(Empty {}))
}

async fn admin_list_interface_routes(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<Vec<InterfaceRoute>>> {
    Ok(Json(state.admin().list_interface_routes(&req.interface_id)?))
}

async fn admin_create_interface_route(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state
        .admin()
        .create_interface_route(&cancel, &req.interface_id, &req.cidr)
        .await?;
    Ok(Json(Empty {}))
}

async fn admin_delete_interface_route(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state
        .admin()
        .delete_interface_route(&cancel, &req.interface_id, &req.cidr)
        .await?;
    Ok(Json(Empty {}))
}

async fn admin_list_peer_routes(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::PeerIdRequest>,
) -> Result<Json<Vec<PeerRoute>>> {
    Ok(Json(state.admin().list_peer_routes(&req.peer_id)?))
}

async fn admin_create_peer_route(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::PeerRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state.admin().create_peer_route(&cancel, &req.peer_id, &req.cidr).await?;
    Ok(Json(Empty {}))
}

async fn admin_delete_peer_route(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::PeerRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state.admin().delete_peer_route(&cancel, &req.peer_id, &req.cidr).await?;
    Ok(Json(Empty {}))
}

// ============================================================================
// Live handlers
// ============================================================================

fn live_view(iface: AdminInterface) -> LiveInterface {
    LiveInterface {
        id: iface.id,
        name: iface.name,
        address: iface.address,
        listen_port: iface.listen_port,
        public_key: iface.public_key,
        mtu: iface.mtu,
    }
}

async fn live_list_interfaces(
    State(state): State<DaemonState>,
    Json(_): Json<Empty>,
) -> Result<Json<Vec<LiveInterface>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.repo().list_interfaces(&cancel).await?))
}

async fn live_get_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<LiveInterface>> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.repo().get_interface(&cancel, &req.interface_id).await?))
}

async fn live_create_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceConfigRequest>,
) -> Result<Json<LiveInterface>> {
    let (cancel, _guard) = request_token();
    let iface = state.admin().create_interface(&cancel, req.config).await?;
    Ok(Json(live_view(iface)))
}

async fn live_update_interface(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::InterfaceConfigRequest>,
) -> Result<Json<LiveInterface>> {
    let (cancel, _guard) = request_token();
    let iface = state.admin().update_interface(&cancel, req.config).await?;
    Ok(Json(live_view(iface)))
}

async fn live_create_peer(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::CreatePeerRequest>,
) -> Result<Json<LivePeer>> {
    let (cancel, _guard) = request_token();
    let peer = state
        .admin()
        .create_live_peer(&cancel, &req.interface_id, &req.endpoint, &req.allowed_ips)
        .await?;
    Ok(Json(peer))
}

async fn live_update_peer_allowed_ips(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::UpdatePeerAllowedIpsRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state
        .admin()
        .update_live_peer_allowed_ips(&cancel, &req.interface_id, &req.peer_id, &req.allowed_ips)
        .await?;
    Ok(Json(Empty {}))
}

async fn live_delete_peer(
    State(state): State<DaemonState>,
    Json(req): Json<rpc::PeerIdRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    state.admin().delete_live_peer(&cancel, &req.peer_id).await?;
    Ok(Json(Empty {}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wgplane_common::testing::FakeHost;
    use wgplane_common::Database;

    fn app() -> (Router, Arc<FakeHost>) {
        let host = Arc::new(FakeHost::new());
        let state = DaemonState::with_database(&DaemonConfig::default(), Database::open_memory().unwrap(), host.clone());
        (router(state), host)
    }

    async fn call(app: &Router, path: String, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn admin_path(name: &str) -> String {
        rpc::path(rpc::ADMIN_PREFIX, name)
    }

    fn wg0() -> serde_json::Value {
        serde_json::json!({
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

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_interface_and_peer_flow() {
        let (app, host) = app();

        let (status, iface) = call(&app, admin_path(ops::CREATE_INTERFACE), wg0()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(iface["name"], "office");
        assert_eq!(iface["endpoint"], "vpn.example.com");

        let (status, peer) = call(
            &app,
            admin_path(ops::CREATE_PEER),
            serde_json::json!({ "interface_id": "wg0" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(peer["allowed_ip"], "10.0.0.2/32");
        assert_eq!(peer["email"], "");

        let (_, peers) = call(&app, admin_path(ops::LIST_PEERS), serde_json::json!({})).await;
        assert_eq!(peers.as_array().unwrap().len(), 1);

        let peer_id = peer["peer_id"].as_str().unwrap().to_string();
        let (status, _) = call(
            &app,
            admin_path(ops::DELETE_PEER),
            serde_json::json!({ "peer_id": peer_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(host.peer_ids("wg0").is_empty());
    }

    #[tokio::test]
    async fn test_errors_carry_class() {
        let (app, _) = app();

        let (status, body) = call(
            &app,
            admin_path(ops::GET_INTERFACE),
            serde_json::json!({ "interface_id": "wg9" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = call(
            &app,
            admin_path(ops::CREATE_INTERFACE_ROUTE),
            serde_json::json!({ "interface_id": "wg0", "cidr": "10.8.0.0" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_live_peer_is_not_recorded() {
        let (app, host) = app();
        call(&app, admin_path(ops::CREATE_INTERFACE), wg0()).await;

        let (status, peer) = call(
            &app,
            rpc::path(rpc::LIVE_PREFIX, live::CREATE_PEER),
            serde_json::json!({ "interface_id": "wg0", "endpoint": "edge.example.com:443" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(peer["config"].as_str().unwrap().contains("Endpoint = edge.example.com:443"));
        assert_eq!(host.peer_ids("wg0").len(), 1);

        let (_, peers) = call(&app, admin_path(ops::LIST_PEERS), serde_json::json!({})).await;
        assert!(peers.as_array().unwrap().is_empty());

        let (status, rules) = call(
            &app,
            rpc::path(rpc::LIVE_PREFIX, live::LIST_FIREWALL_RULES),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(rules["rules"].as_str().unwrap().starts_with("-N WGPLANE_FWD"));
    }
}
