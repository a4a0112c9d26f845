use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use vidtutor_core::{FrameAnalysis, PlaybackSnapshot, VideoInfo, ViewerSession};
use vidtutor_schema::{FrameRef, TimeUpdate};

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub video_id: String,
    /// Known by a client that came from search results.
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
    pub segments: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/{id}", get(get_snapshot).delete(close_session))
        .route("/{id}/time", post(report_time))
        .route("/{id}/frames", post(analyze_frame))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSession>,
) -> Result<Json<SessionCreated>, ApiError> {
    let video_id = req.video_id.trim().to_string();
    if video_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "videoId is required"));
    }

    let mut video = VideoInfo {
        video_id,
        title: req.video_title.filter(|t| !t.trim().is_empty()),
        duration_seconds: req.duration_seconds,
    };
    if video.title.is_none() || video.duration_seconds.is_none() {
        if let Some(details) = state.youtube.video_details(&video.video_id).await {
            video.title = video.title.or(Some(details.title));
            video.duration_seconds = video.duration_seconds.or(details.duration_seconds);
        }
    }

    // A missing transcript is not an error: the tutor falls back to the title.
    let transcript = state.transcripts.get_or_fetch(&video.video_id).await;
    let session = state.sessions.create(video, transcript).await;

    Ok(Json(SessionCreated {
        session_id: session.id.clone(),
        video_title: session.video.title.clone(),
        segments: session.transcript.len(),
    }))
}

async fn find_session(state: &AppState, id: &str) -> Result<Arc<ViewerSession>, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("session not found: {id}")))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlaybackSnapshot>, ApiError> {
    let session = find_session(&state, &id).await?;
    Ok(Json(session.snapshot()))
}

async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.sessions.remove(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn report_time(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TimeUpdate>,
) -> Result<StatusCode, ApiError> {
    let session = find_session(&state, &id).await?;
    session
        .report_time(update.seconds)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn analyze_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(frame): Json<FrameRef>,
) -> Result<Json<FrameAnalysis>, ApiError> {
    let session = find_session(&state, &id).await?;
    Ok(Json(session.analyze_frame(&frame, Instant::now()).await))
}
