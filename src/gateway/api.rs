//! HTTP surface of the orchestration core.
//!
//! Three callback operations funnel into the session store: the Control
//! Surface pre-registers a job (`init`), the analyzer reports progress any
//! number of times and a result exactly once. The gateway's own job is
//! shape validation and translating store rejections into the wire-level
//! status codes; it never mutates session state itself.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::stream::stream_job;
use crate::config::Config;
use crate::errors::StoreError;
use crate::handoff;
use crate::session::model::{
    FailureKind, GenerationSession, ProgressEvent, RequestParams, SessionEvent, SessionFailure,
    SessionKind,
};
use crate::session::store::SessionStore;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Arc<SessionStore>,
    pub config: Config,
    /// Base URL the analyzer calls back on, resolved once the listener
    /// knows its real address.
    pub callback_base: String,
}

pub type SharedState = Arc<AppState>;

// ── Request/response payload types ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitJobRequest {
    pub kind: SessionKind,
    pub params: RequestParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitJobResponse {
    /// OS-routed URL the Control Surface hands to the operating system.
    pub deep_link: String,
}

/// Final report from the analyzer: success with a payload, or a structured
/// failure whose message is propagated verbatim.
#[derive(Debug, Deserialize)]
pub struct ResultReport {
    pub ok: bool,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Stale(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Stale(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId { .. } => ApiError::Conflict(err.to_string()),
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::StaleEvent { .. } => ApiError::Stale(err.to_string()),
            StoreError::AlreadyTerminal { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn gateway_router() -> Router<SharedState> {
    Router::new()
        .route("/jobs/{id}/init", post(init_job))
        .route("/jobs/{id}/progress", post(report_progress))
        .route("/jobs/{id}/result", post(report_result))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}", get(get_job))
        .route("/health", get(health_check))
}

// ── Validation helpers ────────────────────────────────────────────────

/// Session ids are minted by the Control Surface; accept only characters
/// that are safe in URLs and log lines.
fn validate_session_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > 128 {
        return Err(ApiError::BadRequest("Invalid session id".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::BadRequest("Invalid session id".into()));
    }
    Ok(())
}

/// Parse a callback body, logging only a digest of malformed payloads so a
/// large metadata blob never lands in the logs.
fn parse_body<T: DeserializeOwned>(id: &str, body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        let digest = Sha256::digest(body);
        let digest: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        warn!(
            session_id = %id,
            payload_sha256 = %digest,
            payload_len = body.len(),
            %err,
            "malformed callback payload rejected"
        );
        ApiError::BadRequest("Malformed payload".into())
    })
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// Pre-registration, called by the Control Surface before the deep link is
/// handed to the OS. Registers the session, builds the deep link and marks
/// the session dispatched, in that order.
async fn init_job(
    Path(id): Path<String>,
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<InitJobResponse>, ApiError> {
    validate_session_id(&id)?;
    let request: InitJobRequest = parse_body(&id, &body)?;
    if request.params.repo_path.is_empty() {
        return Err(ApiError::BadRequest("repo_path must not be empty".into()));
    }

    let session = state.store.create(&id, request.kind, request.params)?;
    let deep_link = handoff::encode(&session, &state.config.handoff.scheme, &state.callback_base)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.store.mark_dispatched(&id)?;

    Ok(Json(InitJobResponse { deep_link }))
}

/// Progress report from the analyzer. Stale sequences come back as 422,
/// reports after a terminal state as 409.
async fn report_progress(
    Path(id): Path<String>,
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&id)?;
    let event: ProgressEvent = parse_body(&id, &body)?;
    if event.progress > 100 {
        return Err(ApiError::BadRequest("progress must be 0-100".into()));
    }

    state.store.apply(&id, SessionEvent::Progress(event))?;
    Ok(StatusCode::OK)
}

/// Terminal report from the analyzer, exactly once per session.
async fn report_result(
    Path(id): Path<String>,
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&id)?;
    let report: ResultReport = parse_body(&id, &body)?;

    let event = if report.ok {
        SessionEvent::Completed {
            sequence: report.sequence,
            result: report.payload.unwrap_or(Value::Null),
        }
    } else {
        let message = report
            .message
            .unwrap_or_else(|| "analyzer reported an unspecified error".to_string());
        SessionEvent::Failed {
            sequence: report.sequence,
            failure: SessionFailure::new(FailureKind::AnalyzerReportedError, message),
        }
    };

    state.store.apply(&id, event)?;
    Ok(StatusCode::OK)
}

/// Poll fallback for a Control Surface that cannot hold a stream open.
async fn get_job(
    Path(id): Path<String>,
    State(state): State<SharedState>,
) -> Result<Json<GenerationSession>, ApiError> {
    validate_session_id(&id)?;
    Ok(Json(state.store.get(&id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ProgressHub;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let hub = Arc::new(ProgressHub::new());
        Arc::new(AppState {
            store: Arc::new(SessionStore::new(hub)),
            config: Config::default(),
            callback_base: "http://127.0.0.1:7045".to_string(),
        })
    }

    fn test_router() -> (Router, SharedState) {
        let state = test_state();
        let router = gateway_router().with_state(state.clone());
        (router, state)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn init_session(app: &Router, id: &str) {
        let req = post_json(
            &format!("/jobs/{id}/init"),
            r#"{"kind": "single_artifact", "params": {"repo_path": "/work/repo"}}"#,
        );
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let (app, _) = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn init_returns_deep_link_and_dispatches() {
        let (app, state) = test_router();
        let req = post_json(
            "/jobs/s1/init",
            r#"{"kind": "single_artifact", "params": {"repo_path": "/work/repo"}}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed: InitJobResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.deep_link.starts_with("changescribe://analyze?"));
        assert!(parsed.deep_link.contains("sessionId=s1"));

        let session = state.store.get("s1").unwrap();
        assert_eq!(session.status, crate::session::model::SessionStatus::Dispatched);
    }

    #[tokio::test]
    async fn duplicate_init_returns_409_without_resetting_state() {
        let (app, state) = test_router();
        init_session(&app, "s1").await;

        let progress = post_json("/jobs/s1/progress", r#"{"progress": 30, "sequence": 1}"#);
        assert_eq!(
            app.clone().oneshot(progress).await.unwrap().status(),
            StatusCode::OK
        );

        let req = post_json(
            "/jobs/s1/init",
            r#"{"kind": "multi_artifact", "params": {"repo_path": "/other"}}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let session = state.store.get("s1").unwrap();
        assert_eq!(session.progress, 30);
        assert_eq!(session.request_params.repo_path, "/work/repo");
    }

    #[tokio::test]
    async fn multi_artifact_init_embeds_metadata_in_deep_link() {
        let (app, _) = test_router();
        let req = post_json(
            "/jobs/batch1/init",
            r#"{"kind": "multi_artifact", "params": {"repo_path": "/work/repo", "metadata": {"artifacts": ["a", "b"]}}}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed: InitJobResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.deep_link.starts_with("changescribe://analyze-batch?"));
        assert!(parsed.deep_link.contains("metadata="));
    }

    #[tokio::test]
    async fn progress_for_unknown_session_returns_404() {
        let (app, _) = test_router();
        let req = post_json("/jobs/ghost/progress", r#"{"progress": 10, "sequence": 1}"#);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stale_progress_returns_422_and_is_not_applied() {
        let (app, state) = test_router();
        init_session(&app, "s1").await;

        let req = post_json("/jobs/s1/progress", r#"{"progress": 10, "sequence": 5}"#);
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = post_json("/jobs/s1/progress", r#"{"progress": 5, "sequence": 5}"#);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(state.store.get("s1").unwrap().progress, 10);
    }

    #[tokio::test]
    async fn result_is_exactly_once_second_call_conflicts() {
        let (app, state) = test_router();
        init_session(&app, "s3").await;

        let req = post_json(
            "/jobs/s3/result",
            r#"{"ok": true, "sequence": 1, "payload": {"doc": "scenario.md"}}"#,
        );
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = post_json("/jobs/s3/result", r#"{"ok": false, "error": "too late"}"#);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let session = state.store.get("s3").unwrap();
        assert_eq!(session.result.unwrap()["doc"], "scenario.md");
        assert!(session.error.is_none());
    }

    #[tokio::test]
    async fn analyzer_reported_error_is_propagated_verbatim() {
        let (app, state) = test_router();
        init_session(&app, "s1").await;

        let req = post_json(
            "/jobs/s1/result",
            r#"{"ok": false, "error": "repository path does not exist"}"#,
        );
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);

        let session = state.store.get("s1").unwrap();
        let failure = session.error.unwrap();
        assert_eq!(failure.kind, FailureKind::AnalyzerReportedError);
        assert_eq!(failure.message, "repository path does not exist");
    }

    #[tokio::test]
    async fn progress_after_terminal_returns_409() {
        let (app, _) = test_router();
        init_session(&app, "s1").await;

        let req = post_json("/jobs/s1/result", r#"{"ok": true, "payload": {}}"#);
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = post_json("/jobs/s1/progress", r#"{"progress": 99, "sequence": 50}"#);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_callback_returns_400() {
        let (app, _) = test_router();
        init_session(&app, "s1").await;

        let req = post_json("/jobs/s1/progress", r#"{"progress": "not a number"#);
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = post_json("/jobs/s1/progress", r#"{"progress": 150, "sequence": 1}"#);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_id_characters_are_validated() {
        let (app, _) = test_router();
        let req = post_json(
            "/jobs/..%2Fetc/init",
            r#"{"kind": "single_artifact", "params": {"repo_path": "/x"}}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_job_returns_current_snapshot() {
        let (app, _) = test_router();
        init_session(&app, "s1").await;
        let req = post_json("/jobs/s1/progress", r#"{"progress": 42, "sequence": 1, "message": "calling LLM"}"#);
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/jobs/s1")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "running");
        assert_eq!(parsed["progress"], 42);
        assert_eq!(parsed["message"], "calling LLM");
    }

    #[tokio::test]
    async fn get_unknown_job_returns_404() {
        let (app, _) = test_router();
        let req = Request::builder()
            .uri("/jobs/ghost")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
