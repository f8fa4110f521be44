//! Serving the router with graceful shutdown.

use crate::routes::create_router;
use crate::session::CloseReason;
use crate::state::AppState;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Serve until `shutdown` resolves.
///
/// Background tasks stop and live sessions are terminated once the signal
/// fires; the HTTP server then drains in-flight requests. The shared render
/// backend is released afterwards.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let tasks = state.spawn_background(stop_rx);
    let router = create_router(Arc::clone(&state));

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, context_path = %state.config.context_path, "mmdr server listening");
    }

    let sessions = Arc::clone(&state.sessions);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown signal received");
            let _ = stop_tx.send(true);
            sessions.terminate_all(CloseReason::ServerShutdown);
        })
        .await?;

    for task in tasks {
        let _ = task.await;
    }
    state
        .coordinator
        .resources()
        .release("graceful-shutdown")
        .await;
    info!("mmdr server stopped");
    Ok(())
}
