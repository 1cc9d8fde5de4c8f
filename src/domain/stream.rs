use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::detection::Detection;

/// Per-frame metadata published alongside the annotated JPEG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub infer_ms: f32,
    pub fps_est: f32,
    pub detections: Vec<Detection>,
}

/// Item carried on the broadcast channel between the stream worker and the
/// WebSocket handlers.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame { meta: FrameMeta, jpeg: Vec<u8> },
    /// The source reported end-of-stream, or a stop was requested.
    Ended,
    /// The source could not be opened or read; the message is user-facing.
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrameMetaMessage {
    pub r#type: String,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEventMessage {
    pub r#type: String,
    pub message: String,
}

pub fn summarize_detections(detections: &[Detection]) -> String {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(&det.label).or_insert(0) += 1;
    }
    counts
        .iter()
        .map(|(label, count)| format!("{} {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}
