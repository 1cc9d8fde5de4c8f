use std::sync::Arc;

use crate::application::services::{DetectionService, StreamService};

/// Shared state for the axum handlers: the application services, which carry
/// the cached detector and the active stream between interactions.
#[derive(Clone)]
pub struct HttpState {
    /// One-shot image inference.
    pub detection: Arc<DetectionService>,
    /// Video-file and webcam streaming.
    pub stream: Arc<StreamService>,
}
