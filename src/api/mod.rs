//! HTTP API
//!
//! The REST surface the console frontend talks to, served over plain HTTP.

pub mod rest;

pub use rest::RestRouter;

use crate::error::{Error, Result};
use axum::Router;
use std::net::SocketAddr;
use tracing::info;

/// Bind and serve the router until the shutdown future resolves.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!("REST API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}
