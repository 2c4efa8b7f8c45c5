//! Warden daemon library
//!
//! This module provides the network-facing half of Warden:
//! - The public gateway (intent submission, governance reads)
//! - The internal-control listener (approval, execution, halt)
//! - Bearer-token auth, per-key rate limiting and request limits
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
