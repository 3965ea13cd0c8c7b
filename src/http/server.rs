//! HTTP server bootstrap with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::session::SessionCoordinator;
use crate::{AppError, Result};

use super::routes;

/// Serve the API on `port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener fails to bind or the
/// server errors out.
pub async fn serve(
    coordinator: Arc<SessionCoordinator>,
    port: u16,
    ct: CancellationToken,
) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let router = routes::router(coordinator);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;

    info!(%bind, "starting HTTP API");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("HTTP server error: {err}")))?;

    info!("HTTP API shut down");
    Ok(())
}
