use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::interrupt::{InterruptBroker, PendingPromptView};
use crate::progress::{ProgressRegistry, ProgressState};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub broker: Arc<InterruptBroker>,
    pub progress: Arc<ProgressRegistry>,
}

impl AppState {
    pub fn new(broker: Arc<InterruptBroker>, progress: Arc<ProgressRegistry>) -> Self {
        Self { broker, progress }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request/response payloads ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveResponse {
    pub success: bool,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/prompts/{session_id}", get(get_prompt))
        .route("/api/prompts/{session_id}/submit", post(submit_prompt))
        .route("/api/prompts/{session_id}/cancel", post(cancel_prompt))
        .route("/api/sessions/{session_id}/progress", get(get_progress))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_prompt(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<PendingPromptView>, ApiError> {
    state
        .broker
        .get_pending_prompt(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No pending prompt for session {}", session_id)))
}

async fn submit_prompt(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Json<ResolveResponse> {
    let success = state.broker.submit_input(&session_id, &req.value);
    tracing::info!(session_id = %session_id, success, "Prompt submit via API");
    Json(ResolveResponse { success })
}

async fn cancel_prompt(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<ResolveResponse> {
    let success = state.broker.cancel_input(&session_id);
    tracing::info!(session_id = %session_id, success, "Prompt cancel via API");
    Json(ResolveResponse { success })
}

async fn get_progress(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<ProgressState> {
    let snapshot = match state.progress.get(&session_id) {
        Some(reporter) => reporter.snapshot().await,
        None => ProgressState::default(),
    };
    Json(snapshot)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        Arc::new(AppState::new(
            Arc::new(InterruptBroker::new()),
            Arc::new(ProgressRegistry::new()),
        ))
    }

    fn test_app(state: SharedState) -> Router {
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Park a prompt for `session_id` on a background task.
    async fn park_prompt(
        state: &SharedState,
        session_id: &'static str,
    ) -> tokio::task::JoinHandle<Option<String>> {
        let broker = Arc::clone(&state.broker);
        let handle = tokio::spawn(async move {
            broker
                .request_input(session_id, "otp", "Enter code", "otp", Duration::from_secs(300))
                .await
        });
        while !state.broker.has_pending_prompt(session_id) {
            tokio::task::yield_now().await;
        }
        handle
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_prompt_not_found() {
        let app = test_app(test_state());
        let req = Request::builder()
            .uri("/api/prompts/nobody")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("nobody"));
    }

    #[tokio::test]
    async fn test_get_then_submit_prompt() {
        let state = test_state();
        let app = test_app(Arc::clone(&state));
        let waiter = park_prompt(&state, "s1").await;

        let req = Request::builder()
            .uri("/api/prompts/s1")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let view: PendingPromptView = body_json(resp.into_body()).await;
        assert_eq!(view.prompt_type, "otp");

        let resp = app
            .clone()
            .oneshot(post_json("/api/prompts/s1/submit", serde_json::json!({"value": "123456"})))
            .await
            .unwrap();
        let result: ResolveResponse = body_json(resp.into_body()).await;
        assert!(result.success);
        assert_eq!(waiter.await.unwrap(), Some("123456".to_string()));

        // Nothing left to resolve.
        let resp = app
            .oneshot(post_json("/api/prompts/s1/submit", serde_json::json!({"value": "again"})))
            .await
            .unwrap();
        let result: ResolveResponse = body_json(resp.into_body()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_cancel_prompt() {
        let state = test_state();
        let app = test_app(Arc::clone(&state));
        let waiter = park_prompt(&state, "s2").await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/prompts/s2/cancel")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let result: ResolveResponse = body_json(resp.into_body()).await;
        assert!(result.success);
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_progress_snapshot() {
        let state = test_state();
        let app = test_app(Arc::clone(&state));

        let req = Request::builder()
            .uri("/api/sessions/unknown/progress")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let snapshot: ProgressState = body_json(resp.into_body()).await;
        assert_eq!(snapshot, ProgressState::default());

        let reporter = state.progress.reporter("s3");
        reporter.start_automation(12).await;
        reporter.complete_step("Open cart").await;

        let req = Request::builder()
            .uri("/api/sessions/s3/progress")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let snapshot: ProgressState = body_json(resp.into_body()).await;
        assert!(snapshot.is_running);
        assert_eq!(snapshot.total_steps, 12);
        assert_eq!(snapshot.steps_completed, vec!["Open cart"]);
    }
}
