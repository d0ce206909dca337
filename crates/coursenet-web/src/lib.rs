//! coursenet-web - HTTP gateway for coursenet using Axum

pub mod error;
pub mod handlers;
pub mod router;

pub use error::ApiError;
pub use router::create_router;

use anyhow::Result;
use coursenet_core::{Computations, ReadThroughCache};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared by every request; holds no per-request state
pub struct AppState {
    pub cache: ReadThroughCache,
    pub compute: Computations,
}

impl AppState {
    pub fn new(cache: ReadThroughCache, compute: Computations) -> Self {
        Self { cache, compute }
    }
}

/// Run the web server until Ctrl-C
pub async fn run(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Server running at http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
