mod sessions;
mod tracking;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::{metrics::MetricsSnapshot, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/session/start", post(sessions::start_session))
        .route("/session/end", post(sessions::end_session))
        .route("/session/:id", get(sessions::get_session))
        .route("/session/:id/activity", get(sessions::get_activity))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/user/:user_id", get(sessions::list_user_sessions))
        .route("/ws/session/:session_id/track", get(tracking::track_session))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(
        state
            .metrics
            .get_snapshot(state.tracking.active_streams())
            .await,
    )
}
