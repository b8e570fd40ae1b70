//! Learning session API handlers
//!
//! POST /sessions, GET /sessions, GET /sessions/:id,
//! POST /sessions/:id/{start,pause,resume,stop,follow-up},
//! GET /sessions/:id/file, GET /sessions/:id/filtering-summary

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiResult,
    models::{NewSession, SessionStatus, SessionStatusReport},
    services::FilterSummary,
    store::SessionFile,
    AppState,
};

/// Response of every lifecycle action
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionActionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
}

/// POST /sessions/:id/follow-up request
#[derive(Debug, Default, Deserialize)]
pub struct FollowUpRequest {
    /// Replaces the parent's topic when present
    #[serde(default)]
    pub topic: Option<String>,
}

/// GET /sessions/:id/filtering-summary response
#[derive(Debug, Serialize, Deserialize)]
pub struct FilteringSummaryResponse {
    pub session_id: Uuid,
    /// Absent until the pre-filter phase has written output
    pub summary: Option<FilterSummary>,
}

/// POST /sessions
///
/// Validate and persist a new session in `ready` state. Returns 201.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<NewSession>,
) -> ApiResult<(StatusCode, Json<SessionActionResponse>)> {
    let session_id = state.orchestrator.create_session(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionActionResponse {
            session_id,
            status: SessionStatus::Ready,
        }),
    ))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatusReport>> {
    Json(state.orchestrator.list_sessions().await)
}

/// GET /sessions/:id
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionStatusReport>> {
    Ok(Json(state.orchestrator.get_session_status(session_id).await?))
}

async fn action_response(state: &AppState, session_id: Uuid) -> ApiResult<Json<SessionActionResponse>> {
    let status = state.orchestrator.get_session_status(session_id).await?.status;
    Ok(Json(SessionActionResponse { session_id, status }))
}

/// POST /sessions/:id/start
///
/// Returns as soon as the worker is spawned; poll GET /sessions/:id or
/// follow /events for progress.
pub async fn start_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionActionResponse>> {
    state.orchestrator.start_session(session_id).await?;
    action_response(&state, session_id).await
}

/// POST /sessions/:id/pause
pub async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionActionResponse>> {
    state.orchestrator.pause_session(session_id).await?;
    action_response(&state, session_id).await
}

/// POST /sessions/:id/resume
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionActionResponse>> {
    state.orchestrator.resume_session(session_id).await?;
    action_response(&state, session_id).await
}

/// POST /sessions/:id/stop
///
/// The reported status is still `running`/`paused` until the worker reaches
/// its next checkpoint.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionActionResponse>> {
    state.orchestrator.stop_session(session_id).await?;
    action_response(&state, session_id).await
}

/// POST /sessions/:id/follow-up
pub async fn create_follow_up(
    State(state): State<AppState>,
    Path(parent_id): Path<Uuid>,
    body: Option<Json<FollowUpRequest>>,
) -> ApiResult<(StatusCode, Json<SessionActionResponse>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session_id = state
        .orchestrator
        .create_follow_up_session(parent_id, request.topic)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionActionResponse {
            session_id,
            status: SessionStatus::Ready,
        }),
    ))
}

/// GET /sessions/:id/file
pub async fn get_session_file(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionFile>> {
    Ok(Json(state.orchestrator.load_session_file(session_id).await?))
}

/// GET /sessions/:id/filtering-summary
pub async fn get_filtering_summary(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<FilteringSummaryResponse>> {
    let summary = state.orchestrator.filtering_summary(session_id).await?;
    Ok(Json(FilteringSummaryResponse { session_id, summary }))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session_status))
        .route("/sessions/:id/start", post(start_session))
        .route("/sessions/:id/pause", post(pause_session))
        .route("/sessions/:id/resume", post(resume_session))
        .route("/sessions/:id/stop", post(stop_session))
        .route("/sessions/:id/follow-up", post(create_follow_up))
        .route("/sessions/:id/file", get(get_session_file))
        .route("/sessions/:id/filtering-summary", get(get_filtering_summary))
}
