pub mod chat;
pub mod health;
pub mod sessions;
pub mod videos;

use axum::{http::StatusCode, Json};
use axum::Router;
use serde_json::{json, Value};

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/health", health::router())
        .nest("/videos", videos::router())
        .nest("/sessions", sessions::router())
        .nest("/chat", chat::router())
}

pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}
