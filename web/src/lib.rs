//! HTTP transport for the push broker.
//!
//! This crate only adapts HTTP requests onto `sse::Manager` operations:
//! opening an event stream, publishing, disconnecting, metrics and reset.

use log::*;
use service::AppState;
use tokio::net::TcpListener;

pub use error::{Error, Result};

mod controller;
mod error;
mod router;
mod sse;

pub use router::define_routes;

/// Bind to the configured interface and serve until Ctrl-C is received.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let server_url = format!(
        "{}:{}",
        app_state.config.interface(),
        app_state.config.port
    );
    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    axum::serve(listener, router::define_routes(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received");
}
