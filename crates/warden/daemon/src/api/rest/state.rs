//! Application state for API handlers

use super::auth::TokenRegistry;
use super::rate_limit::RateLimiter;
use crate::config::GatewayConfig;
use std::sync::Arc;
use warden_core::Orchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The governance orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Accepted bearer tokens
    pub tokens: Arc<TokenRegistry>,

    /// Per-key rate limiter
    pub rate_limiter: Arc<RateLimiter>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: Arc<Orchestrator>, gateway: &GatewayConfig) -> Self {
        Self {
            orchestrator,
            tokens: Arc::new(TokenRegistry::from_config(&gateway.tokens)),
            rate_limiter: Arc::new(RateLimiter::new(&gateway.rate_limit)),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
