//! Backend relay service
//!
//! Serves the `/relay` reverse proxy and the auth diagnostics endpoint for
//! clients that cannot call the backend directly.

use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backend_relay::{
    config::Config,
    handlers::{create_router, AppState},
    validation::{sanitize_url_for_logging, BackendTarget},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        max_request_body_size = config.max_request_body_size,
        "Starting backend relay"
    );

    // Misconfiguration is reported per request as well; surface it early
    match config.relay_base().map(BackendTarget::parse) {
        Some(Ok(target)) => {
            info!(backend = %sanitize_url_for_logging(target.as_str()), "Relay target configured")
        }
        Some(Err(e)) => warn!(error = %e, "Relay target is invalid; relayed calls will fail"),
        None => warn!("API_BASE_URL is not set; relayed calls will fail"),
    }

    // Create shared application state
    let state = AppState::new(config.clone())?;
    let app = create_router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
