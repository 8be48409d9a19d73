// ABOUTME: HTTP handlers for the greeting root and the /apple upload endpoint
// ABOUTME: Provider failures are logged and never change the 200 response

use crate::error::MediaError;
use crate::media::{MediaService, UploadRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{timeout_at, Instant};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, instrument};

pub const GREETING: &str = "Hello Cloudinary-go";

// App state shared across handlers
pub struct AppState {
    pub media: Arc<dyn MediaService>,
    pub operation_timeout: Duration,
}

// Upload response
#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

/// Build the router. `/apple` answers any method; every other path gets the
/// greeting, matching a catch-all `/` route.
pub fn router(state: Arc<AppState>, write_timeout: Duration) -> Router {
    Router::new()
        .route("/apple", any(handle_apple))
        .route("/", any(handle_root))
        .fallback(handle_root)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            write_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_root() -> impl IntoResponse {
    (StatusCode::OK, Json(GREETING))
}

async fn handle_apple(State(state): State<Arc<AppState>>) -> Response {
    let url = resolve_apple_url(&state).await;
    (StatusCode::OK, Json(UrlResponse { url })).into_response()
}

/// Upload the apple image, then look it up and render its URL. Each step's
/// failure is logged and the next step still runs; a failed lookup or render
/// yields an empty URL.
#[instrument(skip(state))]
async fn resolve_apple_url(state: &AppState) -> String {
    let request = UploadRequest::apple();
    let deadline = Instant::now() + state.operation_timeout;

    match within(deadline, state.operation_timeout, state.media.upload(&request)).await {
        // The upload URL is only reported, the response carries the rendered one
        Ok(uploaded) => info!(
            public_id = %uploaded.public_id,
            "url: {}",
            uploaded.secure_url
        ),
        Err(e) => error!(public_id = %request.public_id, "error: {}", e),
    }

    let asset = match within(deadline, state.operation_timeout, state.media.lookup(&request.public_id)).await {
        Ok(asset) => asset,
        Err(e) => {
            error!(public_id = %request.public_id, "lookup error: {}", e);
            return String::new();
        }
    };

    match asset.render() {
        Ok(url) => url,
        Err(e) => {
            error!(public_id = %request.public_id, "render error: {}", e);
            String::new()
        }
    }
}

/// Run a provider call under the request's deadline
async fn within<T, F>(deadline: Instant, budget: Duration, call: F) -> Result<T, MediaError>
where
    F: Future<Output = Result<T, MediaError>>,
{
    timeout_at(deadline, call)
        .await
        .unwrap_or(Err(MediaError::Timeout(budget)))
}
