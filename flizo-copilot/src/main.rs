//! Flizo Copilot
//!
//! Local companion service: session, live devices and trip playback over a
//! REST + SSE API

use anyhow::{Context, Result};
use flizo_api::{DemoTrackingApi, HttpTrackingApi};
use flizo_copilot::{api, config::CopilotConfig, poller, state};
use flizo_core::session::{FileStore, MemoryStore};
use flizo_core::{Session, TrackingApi};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = CopilotConfig::load().context("failed to load configuration")?;
    if std::env::args().any(|arg| arg == "--demo") {
        config.demo = true;
    }

    info!("Starting Flizo Copilot");

    let session = open_session(&config)?;
    let backend: Arc<dyn TrackingApi> = if config.demo {
        info!("Demo mode: serving the synthetic fleet");
        Arc::new(DemoTrackingApi::new(session.clone()))
    } else {
        info!("Tracking API at {}", config.api_url);
        Arc::new(HttpTrackingApi::new(config.api_url.clone(), session.clone()))
    };

    let addr = config.bind;
    let state = state::AppState::new(backend, session, config);

    // Build the router
    let app = api::create_router(state.clone());

    // Start device poller in background
    let poller = tokio::spawn(poller::run(state.clone()));

    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.shutdown.cancel();
            shutdown.stop_timer().await;
        })
        .await?;

    let _ = poller.await;
    Ok(())
}

/// Remembered sessions live in a JSON file; everything else dies with the process
fn open_session(config: &CopilotConfig) -> Result<Session> {
    let path = config.session_file.clone().or_else(FileStore::default_path);
    let durable: Arc<dyn flizo_core::session::KeyValueStore> = match path {
        Some(path) => Arc::new(
            FileStore::open(&path)
                .with_context(|| format!("failed to open session file {}", path.display()))?,
        ),
        None => {
            warn!("No data directory available, sessions will not be remembered");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(Session::new(durable, Arc::new(MemoryStore::new())))
}
