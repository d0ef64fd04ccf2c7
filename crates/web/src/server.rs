//! Self-service HTTP surface
//!
//! Every `/api/v1/*` call must carry the identity header set by the fronting
//! proxy; the header value is the caller's email.

use crate::selfservice::SelfService;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::net::SocketAddr;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use wgplane_common::rpc::{self, api, Empty};
use wgplane_common::{Error, LiveInterface, PeerRecord, PeerRoute, PeerStatus, Result, VERSION};

/// Email of the authenticated caller
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[derive(Clone)]
struct IdentityHeader(String);

fn request_token() -> (CancellationToken, DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

/// Reject requests without an identity and attach the caller otherwise.
async fn require_identity(
    State(header): State<IdentityHeader>,
    mut request: Request,
    next: Next,
) -> Response {
    let email = request
        .headers()
        .get(header.0.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match email {
        Some(email) => {
            debug!(caller = %email, "Authenticated request");
            request.extensions_mut().insert(Caller(email));
            next.run(request).await
        }
        None => Error::Unauthenticated(format!("missing {} header", header.0)).into_response(),
    }
}

pub fn router(service: SelfService, identity_header: &str) -> Router {
    let identity = IdentityHeader(identity_header.to_string());

    let api_routes = Router::new()
        .route(&op(api::LIST_INTERFACES), post(list_interfaces))
        .route(&op(api::LIST_PEER_STATUSES), post(list_peer_statuses))
        .route(&op(api::CREATE_PEER), post(create_peer))
        .route(&op(api::GET_PEER), post(get_peer))
        .route(&op(api::GET_PEER_BY_INTERFACE), post(get_peer_by_interface))
        .route(&op(api::DELETE_PEER), post(delete_peer))
        .route(&op(api::LIST_PEER_ROUTES), post(list_peer_routes))
        .route(&op(api::CREATE_PEER_ROUTE), post(create_peer_route))
        .route(&op(api::DELETE_PEER_ROUTE), post(delete_peer_route))
        .route_layer(middleware::from_fn_with_state(identity, require_identity));

    Router::new()
        .route("/health", get(health_handler))
        .nest(rpc::API_PREFIX, api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn op(name: &str) -> String {
    format!("/{}", name)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: SelfService,
    identity_header: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Self-service listening on http://{}", addr);

    axum::serve(listener, router(service, identity_header))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(service): State<SelfService>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wgplane-web",
        "version": VERSION,
        "backend": service.backend(),
    }))
}

async fn list_interfaces(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(_): Json<Empty>,
) -> Result<Json<Vec<LiveInterface>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(service.list_interfaces(&cancel, &email).await?))
}

async fn list_peer_statuses(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(_): Json<Empty>,
) -> Result<Json<Vec<PeerStatus>>> {
    let (cancel, _guard) = request_token();
    Ok(Json(service.list_peer_statuses(&cancel, &email).await?))
}

async fn create_peer(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::SelfServiceCreatePeerRequest>,
) -> Result<Json<PeerRecord>> {
    let (cancel, _guard) = request_token();
    Ok(Json(service.create_peer(&cancel, &email, &req.interface_id).await?))
}

async fn get_peer(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(_): Json<Empty>,
) -> Result<Json<PeerRecord>> {
    Ok(Json(service.get_peer(&email)?))
}

async fn get_peer_by_interface(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::InterfaceIdRequest>,
) -> Result<Json<PeerRecord>> {
    Ok(Json(service.get_peer_by_interface(&email, &req.interface_id)?))
}

async fn delete_peer(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::PeerIdRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    service.delete_peer(&cancel, &email, &req.peer_id).await?;
    Ok(Json(Empty {}))
}

async fn list_peer_routes(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::PeerIdRequest>,
) -> Result<Json<Vec<PeerRoute>>> {
    Ok(Json(service.list_peer_routes(&email, &req.peer_id)?))
}

async fn create_peer_route(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::PeerRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    service
        .create_peer_route(&cancel, &email, &req.peer_id, &req.cidr)
        .await?;
    Ok(Json(Empty {}))
}

async fn delete_peer_route(
    State(service): State<SelfService>,
    Extension(Caller(email)): Extension<Caller>,
    Json(req): Json<rpc::PeerRouteRequest>,
) -> Result<Json<Empty>> {
    let (cancel, _guard) = request_token();
    service
        .delete_peer_route(&cancel, &email, &req.peer_id, &req.cidr)
        .await?;
    Ok(Json(Empty {}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::ServiceExt;
    use wgplane_common::repository::SimulationRepository;
    use wgplane_common::{Database, InterfaceConfig, InterfaceLocks, Stores};

    fn app() -> Router {
        let stores = Stores::new(&Database::open_memory().unwrap());
        stores
            .interfaces
            .create(&InterfaceConfig {
                id: "wg0".into(),
                name: "office".into(),
                address: "10.0.0.1/24".into(),
                listen_port: 51820,
                mtu: 1420,
                endpoint: "vpn.example.com".into(),
            })
            .unwrap();
        stores.allowed_emails.create("wg0", "alice@example.com").unwrap();

        let repo = Arc::new(SimulationRepository::new(stores.interfaces.clone(), stores.peers.clone()));
        router(SelfService::new(repo, stores, InterfaceLocks::new()), "X-Email")
    }

    async fn call(app: &Router, email: Option<&str>, name: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(rpc::path(rpc::API_PREFIX, name))
            .header("content-type", "application/json");
        if let Some(email) = email {
            builder = builder.header("X-Email", email);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let app = app();
        let (status, body) = call(&app, None, api::LIST_INTERFACES, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");

        let (status, _) = call(&app, Some("  "), api::LIST_INTERFACES, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_needs_no_identity() {
        let response = app()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_peer_lifecycle() {
        let app = app();
        let alice = Some("alice@example.com");

        let (status, interfaces) = call(&app, alice, api::LIST_INTERFACES, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(interfaces[0]["name"], "office");

        let (status, peer) = call(
            &app,
            alice,
            api::CREATE_PEER,
            serde_json::json!({ "interface_id": "wg0" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(peer["email"], "alice@example.com");

        let (status, body) = call(
            &app,
            alice,
            api::CREATE_PEER,
            serde_json::json!({ "interface_id": "wg0" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_exists");

        let (status, mine) = call(&app, alice, api::GET_PEER, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine["peer_id"], peer["peer_id"]);

        let (status, _) = call(
            &app,
            Some("mallory@example.com"),
            api::DELETE_PEER,
            serde_json::json!({ "peer_id": peer["peer_id"] }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            alice,
            api::DELETE_PEER,
            serde_json::json!({ "peer_id": peer["peer_id"] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_request_cannot_choose_destinations() {
        let app = app();
        let (status, peer) = call(
            &app,
            Some("alice@example.com"),
            api::CREATE_PEER,
            serde_json::json!({ "interface_id": "wg0", "allowed_ips": ["0.0.0.0/0"] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let config = peer["config"].as_str().unwrap();
        assert!(config.contains("AllowedIPs = 10.0.0.2/32\n"));
        assert!(!config.contains("0.0.0.0/0"));
    }

    #[tokio::test]
    async fn test_ungranted_interface_is_forbidden() {
        let app = app();
        let (status, body) = call(
            &app,
            Some("bob@example.com"),
            api::CREATE_PEER,
            serde_json::json!({ "interface_id": "wg0" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");
    }
}
