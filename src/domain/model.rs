use serde::{Deserialize, Serialize};

use super::errors::{DomainError, DomainResult};

/// The fixed set of selectable weight files, resolved against the weights
/// directory at startup.
pub const DETECTION_MODELS: [&str; 5] = [
    "yolov8n.onnx",
    "yolov8s.onnx",
    "yolov8m.onnx",
    "yolov8l.onnx",
    "yolov8x.onnx",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelId {
    pub name: String,       // logical name, e.g. "yolov8n"
    pub onnx_path: String,  // filesystem path
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    pub input_size: u32,        // 640 typical
    pub iou_threshold: f32,     // 0..1, NMS overlap cutoff
    pub max_detections: usize,  // e.g. 100
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Confidence threshold selected on the sidebar slider. The UI works in whole
/// percent (30–100); detection works in the equivalent [0.3, 1.0] fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f32);

impl Confidence {
    pub const MIN_PERCENT: u8 = 30;
    pub const MAX_PERCENT: u8 = 100;

    pub fn from_percent(percent: u8) -> DomainResult<Self> {
        if !(Self::MIN_PERCENT..=Self::MAX_PERCENT).contains(&percent) {
            return Err(DomainError::InvalidInput(format!(
                "confidence must be between {} and {}, got {}",
                Self::MIN_PERCENT,
                Self::MAX_PERCENT,
                percent
            )));
        }
        Ok(Self(f32::from(percent) / 100.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}
