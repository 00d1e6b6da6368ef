//! HTTP/WebSocket adapter over the interrupt broker and progress registry.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | Liveness |
//! | `GET /ws/sessions/{session_id}` | Progress stream + prompt delivery + submit/cancel frames |
//! | `GET /api/prompts/{session_id}` | Pending prompt, or 404 |
//! | `POST /api/prompts/{session_id}/submit` | Resolve the pending prompt with `{value}` |
//! | `POST /api/prompts/{session_id}/cancel` | Resolve the pending prompt to nothing |
//! | `GET /api/sessions/{session_id}/progress` | Current progress snapshot |

pub mod api;
pub mod ws;

pub use api::{AppState, SharedState};

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

/// Configuration for [`start_server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests (local dashboard development)
    pub dev_mode: bool,
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws/sessions/{session_id}", get(ws::session_ws_handler))
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: SharedState) -> Result<()> {
    let mut app = build_router(Arc::clone(&state));
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "cartpilot server listening");
    println!("cartpilot server running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptBroker;
    use crate::progress::ProgressRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        build_router(Arc::new(AppState::new(
            Arc::new(InterruptBroker::new()),
            Arc::new(ProgressRegistry::new()),
        )))
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = test_router();
        let req = Request::builder()
            .uri("/ws/sessions/s1")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
