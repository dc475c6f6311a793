use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::FocusError,
    models::{ActivityRecord, Session, SessionFilter, SessionReport, SessionSummary},
    session::SessionStarted,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub user_id: String,
    pub duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub session: SessionStarted,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub message: &'static str,
    pub report: SessionReport,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub message: &'static str,
    pub data: T,
}

/// Malformed or incomplete bodies are input errors, not axum's default 422.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, FocusError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| FocusError::InvalidInput(rejection.body_text()))
}

pub async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartSessionResponse>), FocusError> {
    let request = body(payload)?;
    let session = state
        .lifecycle
        .start(&request.user_id, request.duration_minutes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            message: "Session started",
            session,
        }),
    ))
}

pub async fn end_session(
    State(state): State<AppState>,
    payload: Result<Json<EndSessionRequest>, JsonRejection>,
) -> Result<Json<EndSessionResponse>, FocusError> {
    let request = body(payload)?;
    let report = state.lifecycle.end(&request.session_id).await?;

    Ok(Json(EndSessionResponse {
        message: "Session ended",
        report,
    }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DataResponse<Session>>, FocusError> {
    let session = state.lifecycle.get(&session_id).await?;
    Ok(Json(DataResponse {
        message: "Session retrieved",
        data: session,
    }))
}

/// Accepts optional `userId` and `status` query filters.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<DataResponse<Vec<SessionSummary>>>, FocusError> {
    summaries(&state, &filter).await
}

pub async fn list_user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DataResponse<Vec<SessionSummary>>>, FocusError> {
    summaries(&state, &SessionFilter::for_user(user_id)).await
}

async fn summaries(
    state: &AppState,
    filter: &SessionFilter,
) -> Result<Json<DataResponse<Vec<SessionSummary>>>, FocusError> {
    let sessions = state.lifecycle.list(filter).await?;
    Ok(Json(DataResponse {
        message: "Sessions retrieved",
        data: sessions.into_iter().map(SessionSummary::from).collect(),
    }))
}

pub async fn get_activity(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ActivityRecord>, FocusError> {
    state
        .store
        .get_activity(&session_id)
        .await?
        .map(Json)
        .ok_or(FocusError::NoActivity(session_id))
}
