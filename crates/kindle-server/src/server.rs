//! Server setup, routing and shutdown.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let permissive_cors = state.config.permissive_cors;
    let router = Router::new()
        .route("/api/v1/ask", post(handlers::handle_ask))
        .route("/", get(handlers::handle_root))
        .route("/live", get(handlers::handle_live))
        .route("/ready", get(handlers::handle_ready))
        .route("/health", get(handlers::handle_health))
        .route("/ping", get(handlers::handle_ping))
        .layer(TraceLayer::new_for_http());

    let router = if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

/// Run the HTTP server until a termination signal arrives.
///
/// On SIGTERM/SIGINT, active generations are cancelled, the engine is shut
/// down, then open connections are drained.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let lifecycle = state.lifecycle().clone();
    let sessions = state.sessions.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let stopping = lifecycle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let cancelled = sessions.close();
            info!(cancelled, "cancelled in-flight generations");
            stopping.shutdown().await;
        })
        .await?;

    // No-op after a signal-driven shutdown.
    lifecycle.shutdown().await;
    info!("server stopped");
    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => info!("received SIGTERM"),
                    _ = int.recv() => info!("received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal handlers unavailable, falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c");
}
