//! WgPlane scenario harness
//!
//! Runs the daemon and the self-service server in-process on ephemeral ports,
//! with the daemon's host commands answered by a `FakeHost`, and talks to
//! them over real HTTP.

pub mod client;
pub mod error;
pub mod server;

pub use client::ApiClient;
pub use error::{E2eError, E2eResult};
pub use server::{DaemonHandle, WebHandle};
