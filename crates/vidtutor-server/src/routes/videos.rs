use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use vidtutor_schema::{find_segment_at_time, FrameRef, TranscriptSegment, VideoDetails, VideoSummary};

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Deserialize)]
pub struct TimeQuery {
    #[serde(default)]
    pub t: f64,
    /// Skips the details lookup when the caller already knows it.
    #[serde(default)]
    pub duration: Option<u64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/{id}", get(details))
        .route("/{id}/transcript", get(transcript))
        .route("/{id}/transcript/at", get(transcript_at))
        .route("/{id}/frame", get(frame))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<VideoSummary>> {
    Json(state.youtube.search(&query.q).await)
}

async fn details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VideoDetails>, ApiError> {
    state
        .youtube
        .video_details(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("video not found: {id}")))
}

async fn transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<TranscriptSegment>> {
    let transcript = state.transcripts.get_or_fetch(&id).await;
    Json(transcript.to_vec())
}

async fn transcript_at(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TimeQuery>,
) -> Json<Option<TranscriptSegment>> {
    let transcript = state.transcripts.get_or_fetch(&id).await;
    Json(find_segment_at_time(&transcript, query.t).cloned())
}

async fn frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TimeQuery>,
) -> Result<Json<FrameRef>, ApiError> {
    let duration = match query.duration {
        Some(duration) => Some(duration),
        None => state
            .youtube
            .video_details(&id)
            .await
            .and_then(|d| d.duration_seconds),
    };
    state
        .sampler
        .sample(&id, query.t, duration)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}
