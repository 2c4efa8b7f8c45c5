//! Warden Daemon - human-gated governance orchestrator
//!
//! The daemon provides:
//! - A public gateway for intent submission and governance reads
//! - An internal-control listener for approval, execution and halt
//! - A hash-chained audit log of every governance decision

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};

/// Warden Daemon CLI
#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden - human-gated governance orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Public listen address
    #[arg(short, long, env = "WARDEN_LISTEN_ADDR")]
    listen: Option<String>,

    /// Internal-control listen address
    #[arg(long, env = "WARDEN_INTERNAL_LISTEN_ADDR")]
    internal_listen: Option<String>,

    /// Log level
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    json: bool,
}

fn parse_addr(value: &str, what: &str) -> DaemonResult<std::net::SocketAddr> {
    value
        .parse()
        .map_err(|e| DaemonError::Config(format!("Invalid {} address '{}': {}", what, value, e)))
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = parse_addr(listen, "listen")?;
    }
    if let Some(internal) = &cli.internal_listen {
        config.server.internal_listen_addr = parse_addr(internal, "internal listen")?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.validate()?;

    // Print startup banner
    println!(
        r#"
 __        __            _
 \ \      / /_ _ _ __ __| | ___ _ __
  \ \ /\ / / _` | '__/ _` |/ _ \ '_ \
   \ V  V / (_| | | | (_| |  __/ | | |
    \_/\_/ \__,_|_|  \__,_|\___|_| |_|

  Human-gated governance orchestrator
  Version: {}
  Gateway: {}
  Internal control: {}
  Start halted: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.server.listen_addr,
        config.server.internal_listen_addr,
        config.orchestrator.start_halted
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
