//! Router and server startup.

use std::sync::Arc;

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::auth_middleware;
use crate::daemon_socket::daemon_ws_handler;
use crate::hook_handler::{claim_feedback_handler, list_sessions_handler, session_end_handler};
use crate::state::{spawn_sweeper, AppState};
use crate::websocket::viewer_ws_handler;

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/sessions/{session_id}", get(viewer_ws_handler))
        .route("/ws/daemon", get(daemon_ws_handler))
        .route("/api/sessions", get(list_sessions_handler))
        .route("/api/feedback/claim", post(claim_feedback_handler))
        .route("/api/hooks/session-end", post(session_end_handler))
        .with_state(state.clone());

    if let Some(token) = state.config.auth_token.as_deref() {
        let token: Arc<str> = Arc::from(token);
        app = app.layer(middleware::from_fn_with_state(token, auth_middleware));
    }

    app.layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let sweeper = spawn_sweeper(state.clone());
    info!(
        component = "server",
        event = "server.listening",
        addr = %listener.local_addr()?,
        auth = state.config.auth_token.is_some(),
        "SessionLink server listening"
    );

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!(
        component = "server",
        event = "server.shutdown",
        "Shutting down"
    );
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
