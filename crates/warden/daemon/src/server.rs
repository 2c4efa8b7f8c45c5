//! Server setup and lifecycle management

use crate::api::{internal_router, public_router};
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use warden_core::Orchestrator;

/// Warden daemon server: one orchestrator behind two listeners
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Open the audit log and build the orchestrator
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let audit = warden_audit::open_store(&config.audit).await?;
        let existing = audit.len().await?;
        if existing > 0 {
            tracing::info!(events = existing, "Resuming from existing audit log");
        }

        let orchestrator = Arc::new(Orchestrator::new(&config.orchestrator, audit));
        orchestrator
            .start()
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        let state = AppState::new(orchestrator, &config.gateway);
        if state.tokens.is_empty() {
            tracing::warn!("No API tokens configured; every authenticated route will return 401");
        }

        Ok(Self { config, state })
    }

    /// Run both listeners until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let public_addr = self.config.server.listen_addr;
        let internal_addr = self.config.server.internal_listen_addr;

        let public = public_router(self.state.clone(), &self.config.gateway);
        let internal = internal_router(self.state.clone(), &self.config.gateway);

        let public_listener = TcpListener::bind(public_addr).await?;
        let internal_listener = TcpListener::bind(internal_addr).await?;

        tracing::info!("Warden gateway listening on {}", public_addr);
        tracing::info!("Warden internal control listening on {}", internal_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        let public_server = axum::serve(public_listener, public)
            .with_graceful_shutdown(wait_for(shutdown_rx.clone()));
        let internal_server = axum::serve(internal_listener, internal)
            .with_graceful_shutdown(wait_for(shutdown_rx));

        let (public_result, internal_result) = tokio::join!(public_server, internal_server);
        public_result.map_err(|e| DaemonError::Server(e.to_string()))?;
        internal_result.map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Warden daemon shutting down");
        Ok(())
    }
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
