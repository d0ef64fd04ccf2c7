//! JSON-over-HTTP call surface
//!
//! Every operation is a `POST <prefix>/<Operation>` carrying a JSON request
//! and returning a JSON response, or an [`ErrorBody`](crate::ErrorBody) with a
//! non-2xx status. Peer ids are base64 and may contain `/`, so they always
//! travel in bodies, never in paths.

use crate::types::InterfaceConfig;
use serde::{Deserialize, Serialize};

/// Live repository operations served by the privileged daemon
pub const LIVE_PREFIX: &str = "/live/v1";
/// Administrator surface of the privileged daemon
pub const ADMIN_PREFIX: &str = "/admin/v1";
/// End-user surface of the self-service server
pub const API_PREFIX: &str = "/api/v1";

/// Operation names on the live surface
pub mod live {
    pub const LIST_INTERFACES: &str = "ListInterfaces";
    pub const GET_INTERFACE: &str = "GetInterface";
    pub const CREATE_INTERFACE: &str = "CreateInterface";
    pub const UPDATE_INTERFACE: &str = "UpdateInterface";
    pub const DELETE_INTERFACE: &str = "DeleteInterface";
    pub const CREATE_PEER: &str = "CreatePeer";
    pub const UPDATE_PEER_ALLOWED_IPS: &str = "UpdatePeerAllowedIPs";
    pub const DELETE_PEER: &str = "DeletePeer";
    pub const LIST_PEER_STATS: &str = "ListPeerStats";
    pub const LIST_CONFIGS: &str = "ListConfigs";
    pub const LIST_FIREWALL_RULES: &str = "ListFirewallRules";
}

/// Operation names on the administrator surface
pub mod admin {
    pub const LIST_INTERFACES: &str = "ListInterfaces";
    pub const GET_INTERFACE: &str = "GetInterface";
    pub const CREATE_INTERFACE: &str = "CreateInterface";
    pub const UPDATE_INTERFACE: &str = "UpdateInterface";
    pub const DELETE_INTERFACE: &str = "DeleteInterface";
    pub const LIST_ALLOWED_EMAILS: &str = "ListAllowedEmails";
    pub const CREATE_ALLOWED_EMAIL: &str = "CreateAllowedEmail";
    pub const DELETE_ALLOWED_EMAIL: &str = "DeleteAllowedEmail";
    pub const LIST_PEERS: &str = "ListPeers";
    pub const CREATE_PEER: &str = "CreatePeer";
    pub const DELETE_PEER: &str = "DeletePeer";
    pub const LIST_PEER_STATS: &str = "ListPeerStats";
    pub const GET_FIREWALL_RULES: &str = "GetFirewallRules";
    pub const LIST_WIREGUARD_CONFIGS: &str = "ListWireguardConfigs";
    pub const LIST_INTERFACE_ROUTES: &str = "ListInterfaceRoutes";
    pub const CREATE_INTERFACE_ROUTE: &str = "CreateInterfaceRoute";
    pub const DELETE_INTERFACE_ROUTE: &str = "DeleteInterfaceRoute";
    pub const LIST_PEER_ROUTES: &str = "ListPeerRoutes";
    pub const CREATE_PEER_ROUTE: &str = "CreatePeerRoute";
    pub const DELETE_PEER_ROUTE: &str = "DeletePeerRoute";
}

/// Operation names on the self-service surface
pub mod api {
    pub const LIST_INTERFACES: &str = "ListInterfaces";
    pub const LIST_PEER_STATUSES: &str = "ListPeerStatuses";
    pub const CREATE_PEER: &str = "CreatePeer";
    pub const GET_PEER: &str = "GetPeer";
    pub const GET_PEER_BY_INTERFACE: &str = "GetPeerByInterface";
    pub const DELETE_PEER: &str = "DeletePeer";
    pub const LIST_PEER_ROUTES: &str = "ListPeerRoutes";
    pub const CREATE_PEER_ROUTE: &str = "CreatePeerRoute";
    pub const DELETE_PEER_ROUTE: &str = "DeletePeerRoute";
}

/// `<prefix>/<operation>`
pub fn path(prefix: &str, operation: &str) -> String {
    format!("{}/{}", prefix, operation)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceIdRequest {
    pub interface_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionalInterfaceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfigRequest {
    pub config: InterfaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePeerRequest {
    pub interface_id: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePeerAllowedIpsRequest {
    pub interface_id: String,
    pub peer_id: String,
    pub allowed_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdRequest {
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub interface_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceRouteRequest {
    pub interface_id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRouteRequest {
    pub peer_id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRulesResponse {
    pub rules: String,
}

/// Self-service peer creation. The owner comes from the identity header and
/// the destinations from the interface routes; callers cannot choose either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfServiceCreatePeerRequest {
    pub interface_id: String,
}
