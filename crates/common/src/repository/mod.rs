//! Live-state repository
//!
//! One contract over the kernel WireGuard state, with three backends:
//! - command: drives `ip`, `wg` and `iptables` on this host
//! - delegating: forwards every call to a privileged `wgplaned`
//! - simulation: fabricates state for unprivileged development setups

use crate::types::*;
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

mod command;
mod delegating;
mod firewall;
mod simulation;

pub use command::CommandRepository;
pub use delegating::DelegatingRepository;
pub use firewall::{Firewall, FirewallConfig};
pub use simulation::SimulationRepository;

/// What a backend is able to do beyond the common contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Firewall operations are available locally
    pub firewall: bool,
    /// Calls mutate the host this process runs on
    pub host: bool,
}

/// Live WireGuard state
///
/// Every call takes the caller's cancellation token; cancelling it aborts the
/// in-flight command or RPC.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    async fn list_interfaces(&self, cancel: &CancellationToken) -> Result<Vec<LiveInterface>>;

    /// Fails with `NotFound` when the interface is absent.
    async fn get_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<LiveInterface>;

    /// Bring up a new interface; a fresh key pair is generated every time.
    async fn create_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface>;

    async fn update_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface>;

    async fn delete_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<()>;

    /// Allocate an address, generate keys and install a peer whose allowed IPs are
    /// its own `/32` followed by `allowed_ips`.
    async fn create_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer>;

    /// Replace the allowed IPs of a live peer. `allowed_ips` is the full effective set.
    async fn update_peer_allowed_ips(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_id: &str,
        allowed_ips: &[String],
    ) -> Result<()>;

    /// Fails with `NotFound` when no managed interface carries the peer.
    async fn delete_peer(&self, cancel: &CancellationToken, peer_id: &str) -> Result<()>;

    async fn list_peer_stats(&self, cancel: &CancellationToken) -> Result<Vec<PeerStat>>;

    /// Dump of the dedicated forwarding chain
    async fn list_firewall_rules(&self, cancel: &CancellationToken) -> Result<String>;

    /// Server-side config of every interface, or only `interface_id`.
    async fn list_configs(
        &self,
        cancel: &CancellationToken,
        interface_id: Option<&str>,
    ) -> Result<Vec<InterfaceConfigDump>>;

    async fn ensure_firewall_chain(&self, cancel: &CancellationToken) -> Result<()>;

    /// Replace the accept rules of the peer at `peer_allowed_ip` with one rule per
    /// entry of `allowed_ips` other than the peer's own address.
    async fn sync_peer_firewall_rules(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_allowed_ip: &str,
        allowed_ips: &[String],
    ) -> Result<()>;

    /// Remove every rule sourced from `peer_allowed_ip`. A missing chain is not an error.
    async fn remove_peer_firewall_rules(&self, cancel: &CancellationToken, peer_allowed_ip: &str) -> Result<()>;
}
