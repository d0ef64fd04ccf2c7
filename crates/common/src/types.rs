//! Core types for WgPlane

use serde::{Deserialize, Serialize};

/// Desired state of a WireGuard interface, as persisted by the admin surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub id: String,
    pub name: String,
    /// Interface address in CIDR notation, e.g. `10.0.0.1/24`
    pub address: String,
    pub listen_port: u32,
    pub mtu: u32,
    /// Public `host[:port]` peers dial
    pub endpoint: String,
}

impl InterfaceConfig {
    /// Fill empty or zero fields from `current`.
    pub fn merged_with(mut self, current: &InterfaceConfig) -> Self {
        if self.name.is_empty() {
            self.name = current.name.clone();
        }
        if self.address.is_empty() {
            self.address = current.address.clone();
        }
        if self.listen_port == 0 {
            self.listen_port = current.listen_port;
        }
        if self.mtu == 0 {
            self.mtu = current.mtu;
        }
        if self.endpoint.is_empty() {
            self.endpoint = current.endpoint.clone();
        }
        self
    }
}

/// Observed state of a running interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveInterface {
    pub id: String,
    pub name: String,
    pub address: String,
    pub listen_port: u32,
    pub public_key: String,
    pub mtu: u32,
}

/// Live interface overlaid with the administrator's stored name and endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminInterface {
    pub id: String,
    pub name: String,
    pub address: String,
    pub listen_port: u32,
    pub public_key: String,
    pub mtu: u32,
    pub endpoint: String,
}

impl AdminInterface {
    pub fn new(live: LiveInterface, config: &InterfaceConfig) -> Self {
        Self {
            id: live.id,
            name: config.name.clone(),
            address: live.address,
            listen_port: live.listen_port,
            public_key: live.public_key,
            mtu: live.mtu,
            endpoint: config.endpoint.clone(),
        }
    }
}

/// A peer as installed on a live interface, with its rendered client config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePeer {
    /// Public key of the peer
    pub id: String,
    pub interface_id: String,
    /// Allocated `/32`
    pub allowed_ip: String,
    pub config: String,
}

/// An admitted peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Owner; empty for admin-created peers
    pub email: String,
    pub peer_id: String,
    pub interface_id: String,
    pub allowed_ip: String,
    pub config: String,
    pub created_at: i64,
}

impl PeerRecord {
    pub fn from_live(email: &str, peer: &LivePeer) -> Self {
        Self {
            email: email.to_string(),
            peer_id: peer.id.clone(),
            interface_id: peer.interface_id.clone(),
            allowed_ip: peer.allowed_ip.clone(),
            config: peer.config.clone(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Access grant for self-service peer creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedEmail {
    pub interface_id: String,
    pub email: String,
    pub created_at: i64,
}

/// Destination applied to every peer of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRoute {
    pub interface_id: String,
    pub cidr: String,
    pub created_at: i64,
}

/// Destination applied to a single peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRoute {
    pub peer_id: String,
    pub cidr: String,
    pub created_at: i64,
}

/// Live traffic counters of a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStat {
    pub peer_id: String,
    pub interface_id: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Unix seconds, 0 when no handshake happened yet
    pub last_handshake_at: i64,
}

/// Peer counters annotated with the interface display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub peer_id: String,
    pub interface_id: String,
    pub interface_name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_at: i64,
}

/// Server-side configuration dump of one live interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfigDump {
    pub interface_id: String,
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_fills_only_missing_fields() {
        let current = InterfaceConfig {
            id: "wg0".into(),
            name: "office".into(),
            address: "10.0.0.1/24".into(),
            listen_port: 51820,
            mtu: 1420,
            endpoint: "vpn.example.com".into(),
        };
        let update = InterfaceConfig {
            id: "wg0".into(),
            listen_port: 51821,
            ..Default::default()
        };

        let merged = update.merged_with(&current);
        assert_eq!(merged.name, "office");
        assert_eq!(merged.address, "10.0.0.1/24");
        assert_eq!(merged.listen_port, 51821);
        assert_eq!(merged.mtu, 1420);
        assert_eq!(merged.endpoint, "vpn.example.com");
    }
}
