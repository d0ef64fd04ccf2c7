//! WgPlane self-service server
//!
//! Lets an authenticated user see the interfaces they were granted and manage
//! their own peer on each. Live changes go through a repository backend,
//! normally one that delegates to the privileged daemon.

pub mod config;
pub mod selfservice;
pub mod server;

pub use config::WebConfig;
pub use selfservice::SelfService;
