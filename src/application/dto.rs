use base64::{prelude::BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::domain::{
    detection::Detection,
    model::{Confidence, ModelId},
    source::SourceKind,
};

/// Parsed multipart form for the image driver.
#[derive(Debug, Clone)]
pub struct ImageDetectRequest {
    pub model_file: String,
    pub confidence_percent: u8,
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Service-level result for one image pass; the HTTP layer base64-encodes it.
#[derive(Debug, Clone)]
pub struct ImageDetectionResult {
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub image: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDetectResponse {
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub content_type: String,
    pub image_b64: String,
}

impl From<ImageDetectionResult> for ImageDetectResponse {
    fn from(r: ImageDetectionResult) -> Self {
        Self {
            width: r.width,
            height: r.height,
            detections: r.detections,
            content_type: r.content_type,
            image_b64: BASE64_STANDARD.encode(r.image),
        }
    }
}

/// JSON body for starting the webcam driver (the video driver arrives as
/// multipart because it carries the file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStreamRequest {
    pub model: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceBounds {
    pub min: u8,
    pub max: u8,
    pub default: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub models: Vec<ModelId>,
    pub sources: Vec<SourceKind>,
    pub confidence: ConfidenceBounds,
}

impl ConfigResponse {
    pub fn new(models: Vec<ModelId>) -> Self {
        Self {
            models,
            sources: crate::domain::source::SOURCE_KINDS.to_vec(),
            confidence: ConfidenceBounds {
                min: Confidence::MIN_PERCENT,
                max: Confidence::MAX_PERCENT,
                default: 50,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
