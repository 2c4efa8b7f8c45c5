//! Configuration for wardend

use crate::api::rest::auth::Scope;
use crate::error::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use warden_audit::AuditConfig;
use warden_core::OrchestratorConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication, rate limiting and request limits
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Audit log storage
    #[serde(default)]
    pub audit: AuditConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public listener (intent submission and governance reads)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Internal-control listener
    #[serde(default = "default_internal_listen_addr")]
    pub internal_listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            internal_listen_addr: default_internal_listen_addr(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bearer tokens accepted by the gateway
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub limits: RequestLimits,

    /// Origins allowed by CORS; empty allows none
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// One bearer token and what it may do.
///
/// Prefer `token_sha256`. A plaintext `token` is hashed when the registry
/// is built and never kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Name recorded as the actor in audit events
    pub principal: String,

    /// Hex SHA-256 digest of the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub scopes: Vec<Scope>,
}

/// Per-key token bucket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained refill rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

/// Request size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLimits {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_max_url_bytes")]
    pub max_url_bytes: usize,

    /// Sum of header name and value lengths
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            max_url_bytes: default_max_url_bytes(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_internal_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9001))
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    10
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_url_bytes() -> usize {
    2 * 1024
}

fn default_max_header_bytes() -> usize {
    8 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and `WARDEN__*`
    /// environment variables, in that order
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // e.g. WARDEN__ORCHESTRATOR__START_HALTED=false
        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the daemon cannot safely run with
    pub fn validate(&self) -> DaemonResult<()> {
        self.orchestrator.validate().map_err(DaemonError::Config)?;

        if self.server.listen_addr == self.server.internal_listen_addr {
            return Err(DaemonError::Config(
                "public and internal listeners must use different addresses".to_string(),
            ));
        }

        let rate = &self.gateway.rate_limit;
        if !(rate.requests_per_second > 0.0 && rate.requests_per_second.is_finite()) || rate.burst == 0 {
            return Err(DaemonError::Config(
                "rate limit must allow a positive rate and burst".to_string(),
            ));
        }

        for token in &self.gateway.tokens {
            if token.principal.trim().is_empty() {
                return Err(DaemonError::Config("token principal must be non-empty".to_string()));
            }
            if token.token.is_none() && token.token_sha256.is_none() {
                return Err(DaemonError::Config(format!(
                    "token for '{}' needs token or token_sha256",
                    token.principal
                )));
            }
        }

        Ok(())
    }
}
