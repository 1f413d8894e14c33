//! Execbox HTTP server.
//!
//! Exposes the execution orchestrator over JSON endpoints plus a WebSocket
//! stream per live execution.
//!
//! # Architecture
//!
//! The server consists of:
//! - **Protocol**: camelCase request/response bodies and stream messages
//! - **Routes**: HTTP and WebSocket handlers
//! - **Error**: mapping of core errors to status codes and error bodies

pub mod error;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use execbox_core::{ExecutorConfig, Orchestrator};

pub use error::{ServerError, ServerResult};
pub use protocol::{ApiResponse, ErrorBody, StreamMessage};
pub use routes::{AppState, DEFAULT_BODY_LIMIT, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Execution settings.
    pub executor: ExecutorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            body_limit: DEFAULT_BODY_LIMIT,
            executor: ExecutorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The socket address to listen on.
    pub fn addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::Address(format!("{}:{}", self.host, self.port)))
    }
}

/// Start the execbox server and run until SIGINT or SIGTERM.
///
/// Live executions are killed and their workspaces removed before this
/// returns.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let addr = config.addr()?;
    let orchestrator = Arc::new(Orchestrator::new(config.executor.clone())?);

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        body_limit: config.body_limit,
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        workspace_root = %config.executor.workspace_root.display(),
        timeout_ms = config.executor.execution_timeout.as_millis() as u64,
        memory_mb = config.executor.memory_limit_mb,
        "Starting execbox server at http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Unable to listen for Ctrl+C: {}", e);
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
                tracing::warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.body_limit, 5 * 1024 * 1024);
        assert_eq!(config.addr().unwrap().port(), 3001);
    }

    #[test]
    fn test_invalid_address() {
        let config = ServerConfig {
            host: "not a host".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.addr(), Err(ServerError::Address(_))));
    }
}
