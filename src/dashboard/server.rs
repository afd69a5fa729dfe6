use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::orchestrator::Supervisor;

use super::routes::{self, DashboardState};
use super::static_files;

pub fn router(supervisor: Arc<Supervisor>) -> axum::Router {
    routes::api_router(DashboardState { supervisor })
        .merge(static_files::static_router())
        .layer(CorsLayer::permissive())
}

/// Bind the panel on localhost. Port 0 picks a free port.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind web panel on {}: {}", addr, e))
}

pub async fn start_dashboard_server(
    listener: TcpListener,
    supervisor: Arc<Supervisor>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "web panel listening");
    }
    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}
