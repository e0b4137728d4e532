//! Render worker composition.
//!
//! Wires one browser-backed rendering provider and one dispatch engine
//! to the transports selected by [`WorkerConfig::conn_mode`]. The worker
//! runs until the first transport stops or a termination signal arrives.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use renderq_browser::{BrowserError, CdpProvider};
use renderq_engine::DispatchEngine;
use renderq_transport::{JobSource, QueueTransport, SocketTransport, TransportError};
use tokio::task::JoinSet;

pub use config::{ConfigError, ConnMode, LogFormat, WorkerConfig};

/// How long to wait for live contexts to be disposed on the way out.
const ENGINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Transport task panicked: {0}")]
    Panicked(String),
}

/// Run the worker until its transports stop.
///
/// Returns `Ok` when a transport closed cleanly or a termination signal
/// arrived, and the first transport's error otherwise.
pub async fn run(config: WorkerConfig) -> Result<(), WorkerError> {
    let provider = CdpProvider::launch(config.browser.clone()).await?;
    let (engine, engine_task) = DispatchEngine::start(Arc::new(provider));

    let mut transports = JoinSet::new();
    if config.conn_mode.uses_nats() {
        let queue = QueueTransport::connect(config.nats.clone()).await?;
        transports.spawn(queue.serve(engine.clone()));
    }
    if config.conn_mode.uses_websocket() {
        let socket = SocketTransport::new(config.websocket_url.clone());
        transports.spawn(socket.serve(engine.clone()));
    }
    // Transports hold the remaining handles; the engine stops with them.
    drop(engine);

    let outcome = tokio::select! {
        Some(joined) = transports.join_next() => match joined {
            Ok(served) => served.map_err(WorkerError::from),
            Err(e) => Err(WorkerError::Panicked(e.to_string())),
        },
        () = shutdown_signal() => Ok(()),
    };

    transports.shutdown().await;
    if tokio::time::timeout(ENGINE_DRAIN_TIMEOUT, engine_task).await.is_err() {
        tracing::warn!("Dispatch engine did not stop in time");
    }

    outcome
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
