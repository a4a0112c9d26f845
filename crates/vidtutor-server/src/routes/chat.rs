use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use vidtutor_core::{RelayError, RelayMode};
use vidtutor_schema::{ChatContext, ChatMessage};

use super::api_error;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Playback context as sent by the player page.
    #[serde(default)]
    pub body: ChatContext,
    #[serde(default)]
    pub mode: RelayMode,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChatReply {
    pub text: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(chat))
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let mut ctx = req.body.normalized();
    if let Some(session_id) = req.session_id.as_deref() {
        match state.sessions.get(session_id).await {
            Some(session) => ctx = session.fill_context(ctx).await,
            None => {
                return api_error(
                    StatusCode::NOT_FOUND,
                    format!("session not found: {session_id}"),
                )
                .into_response()
            }
        }
    }

    tracing::debug!(
        mode = ?req.mode,
        messages = req.messages.len(),
        has_frame = ctx.image_context.is_some(),
        "chat request"
    );

    match req.mode {
        RelayMode::Streaming => match state.relay.stream(&req.messages, &ctx) {
            Ok(events) => {
                let events =
                    events.map(|event| Ok::<_, Infallible>(Event::default().data(event.data())));
                Sse::new(events).into_response()
            }
            Err(e) => relay_error_response(e),
        },
        mode => match state.relay.respond(mode, &req.messages, &ctx).await {
            Ok(text) => Json(ChatReply { text }).into_response(),
            Err(e) => relay_error_response(e),
        },
    }
}

fn relay_error_response(err: RelayError) -> Response {
    match err {
        RelayError::InvalidHistory => {
            api_error(StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        RelayError::Upstream(ref e) => {
            tracing::warn!(error = %e, "chat request failed");
            api_error(StatusCode::BAD_GATEWAY, err.user_message()).into_response()
        }
    }
}
