//! WgPlane Common Library
//!
//! Shared types, persistence, and the live-state repository used by the
//! privileged daemon and the self-service server.

pub mod allocator;
pub mod crypto;
pub mod db;
pub mod destinations;
pub mod error;
pub mod lock;
pub mod peer_config;
pub mod repository;
pub mod rpc;
pub mod runner;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, ErrorBody, Result};
pub use lock::InterfaceLocks;
pub use repository::{Capabilities, Repository};
pub use store::Stores;
pub use sync::PeerSynchronizer;
pub use types::*;

/// WgPlane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".wgplane")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
