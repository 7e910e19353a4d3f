//! Server assembly: router, shared state, listener and graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::api::{AppState, gateway_router};
use crate::config::Config;
use crate::hub::ProgressHub;
use crate::session::store::SessionStore;
use crate::supervisor::TimeoutSupervisor;

/// Wire up the store, hub and state for a given callback base URL.
pub fn build_state(config: Config, callback_base: String) -> Arc<AppState> {
    let hub = Arc::new(ProgressHub::new());
    let store = Arc::new(SessionStore::new(hub));
    Arc::new(AppState {
        store,
        config,
        callback_base,
    })
}

/// Full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dev_mode = state.config.server.dev_mode;
    let mut router = gateway_router().with_state(state);
    if dev_mode {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Start the callback gateway and the timeout supervisor.
///
/// Binds localhost unless dev mode asks for 0.0.0.0; the analyzer runs on
/// the same machine as the browser tab, so localhost is the normal case.
/// Runs until ctrl-c, then shuts down gracefully.
pub async fn start_server(config: Config) -> Result<()> {
    let host = if config.server.dev_mode {
        "0.0.0.0"
    } else {
        "127.0.0.1"
    };
    let addr = format!("{}:{}", host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    let local_addr = listener.local_addr()?;

    // The deep link must carry the address the analyzer can actually reach.
    let callback_base = config
        .handoff
        .callback_base
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", local_addr.port()));

    let timeouts = config.timeouts.clone();
    let state = build_state(config, callback_base);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let supervisor = TimeoutSupervisor::new(state.store.clone(), timeouts);
    let supervisor_handle = supervisor.spawn(shutdown_tx.subscribe());

    let app = build_router(state);

    info!(%local_addr, "changescribe gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(());
    let _ = supervisor_handle.await;
    info!("gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    // Failing to install the handler means we can never shut down cleanly;
    // surfacing that early is better than hanging on ctrl-c.
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn full_router_serves_health() {
        let state = build_state(Config::default(), "http://127.0.0.1:7045".into());
        let app = build_router(state);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = build_state(Config::default(), "http://127.0.0.1:7045".into());
        let app = build_router(state);
        let req = Request::builder()
            .uri("/jobs")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
