use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub llm_configured: bool,
    pub youtube_configured: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        llm_configured: state.config.llm.provider.key_configured(),
        youtube_configured: state.youtube.has_api_key(),
    })
}
