pub mod routes;
pub mod state;

use anyhow::Result;
use axum::http::{StatusCode, Uri};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{api_error, ApiError};
use crate::state::AppState;

/// Every endpoint lives under `/api`; CORS is open so a browser player on
/// another origin can call it.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::api_router())
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("no route for {}", uri.path()))
}

/// Serves until Ctrl-C, then lets open connections finish.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "vidtutor-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
        })
        .await?;
    Ok(())
}
