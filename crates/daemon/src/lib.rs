//! WgPlane daemon
//!
//! Owns the host's WireGuard interfaces and forwarding rules. Serves the
//! administrator API and the live repository surface used by self-service
//! servers that cannot touch the host themselves.

pub mod admin;
pub mod config;
pub mod reconciler;
pub mod server;
pub mod state;

pub use admin::AdminService;
pub use config::DaemonConfig;
pub use reconciler::Reconciler;
pub use state::DaemonState;
