pub mod routes;
pub mod state;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};

use crate::adapters::http::state::HttpState;
use crate::adapters::http::ws::ws_handler;

/// Uploaded videos go through the multipart body; allow a generous cap.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/config", get(routes::get_config))
        .route("/api/detect/image", post(routes::detect_image))
        .route("/api/detect/video", post(routes::detect_video))
        .route("/api/stream/webcam", post(routes::start_webcam))
        .route("/api/stream/stop", post(routes::stop_stream))
        .route("/ws/stream", get(ws_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
