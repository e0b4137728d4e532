//! `renderq-worker` -- headless page rendering worker.
//!
//! Takes "render this URL" jobs from a NATS queue group and/or a
//! WebSocket job server, renders each in a fresh headless Chromium page
//! and replies with the page content and response metadata.
//!
//! See [`WorkerConfig::from_env`] for the environment variables. The
//! process exits non-zero when configuration is invalid, the browser
//! cannot be started, or a transport connection fails, so a supervisor
//! can restart it.

use renderq_worker::{LogFormat, WorkerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "renderq_worker=info,renderq_engine=info,renderq_transport=info,renderq_browser=info";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or_default(),
    );

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        conn_mode = ?config.conn_mode,
        nats_url = %config.nats.url,
        websocket_url = %config.websocket_url,
        "Starting renderq-worker",
    );

    match renderq_worker::run(config).await {
        Ok(()) => tracing::info!("Worker stopped"),
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            std::process::exit(1);
        }
    }
}
