use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array4, ArrayViewD, Axis, IxDyn};
use ort::session::Session;
use ort::value::Tensor;

use crate::application::ports::{Detector, DetectorLoader};
use crate::domain::detection::Detection;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::{Confidence, DetectorParams};

/// COCO class names, indexed by the model's class id.
const CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// YOLO detector backed by an ONNX Runtime session.
pub struct OnnxDetector {
    session: Session,
    params: DetectorParams,
}

impl OnnxDetector {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = Session::builder()?.with_intra_threads(4)?;

        // The weights file is read exactly once; the session keeps the model
        // in memory from here on.
        let model_bytes = fs::read(path)?;
        let session = builder.commit_from_memory(&model_bytes)?;

        Ok(Self { session, params: DetectorParams::default() })
    }
}

impl Detector for OnnxDetector {
    fn detect(&mut self, frame: &RgbImage, confidence: Confidence) -> Result<Vec<Detection>> {
        let imgsz = self.params.input_size as usize;
        let resized =
            image::imageops::resize(frame, imgsz as u32, imgsz as u32, FilterType::Nearest);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        let (raw, _) = input.into_raw_vec_and_offset();
        let input_tensor = Tensor::from_array(([1usize, 3, imgsz, imgsz], raw.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_tensor])?;
        let output = outputs
            .get("output0")
            .ok_or_else(|| anyhow!("model has no 'output0' output; not a YOLO detection model"))?;
        let (shape_out, data_out) = output.try_extract_tensor::<f32>()?;

        // Output layout: [1, 4 + num_classes, num_candidates].
        let dims: Vec<usize> = shape_out.iter().map(|&x| x as usize).collect();
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data_out)?;
        let view = array_view.index_axis(Axis(0), 0);

        let num_candidates = view.shape()[1];
        let sx = frame.width() as f32 / imgsz as f32;
        let sy = frame.height() as f32 / imgsz as f32;

        let mut detections = Vec::new();
        for i in 0..num_candidates {
            let scores = view.slice(s![4.., i]);
            let Some((class_id, &max_score)) = scores
                .indexed_iter()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            else {
                continue;
            };

            if max_score >= confidence.value() {
                let cx = view[[0, i]];
                let cy = view[[1, i]];
                let w = view[[2, i]];
                let h = view[[3, i]];

                detections.push(Detection {
                    x1: (cx - w / 2.0) * sx,
                    y1: (cy - h / 2.0) * sy,
                    x2: (cx + w / 2.0) * sx,
                    y2: (cy + h / 2.0) * sy,
                    score: max_score,
                    class_id,
                    label: CLASSES.get(class_id).unwrap_or(&"object").to_string(),
                });
            }
        }

        Ok(non_max_suppression(
            detections,
            self.params.iou_threshold,
            self.params.max_detections,
        ))
    }
}

/// Greedy per-class NMS: highest score wins, overlapping boxes of the same
/// class are dropped, output capped at `max_detections`.
fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

/// Adapter glue: path in, boxed detector out, with filesystem errors mapped to
/// domain errors the page can display.
pub struct OnnxDetectorLoader;

impl OnnxDetectorLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorLoader for OnnxDetectorLoader {
    fn load(&self, path: &Path) -> DomainResult<Box<dyn Detector>> {
        if !path.exists() {
            return Err(DomainError::NotFound(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        let detector = OnnxDetector::load(path).map_err(|e| {
            DomainError::OperationFailed(format!("could not load model {}: {e}", path.display()))
        })?;
        Ok(Box::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, score: f32, x1: f32) -> Detection {
        Detection {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            score,
            class_id,
            label: CLASSES[class_id].to_string(),
        }
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_the_same_class() {
        let candidates = vec![det(0, 0.9, 0.0), det(0, 0.6, 1.0), det(0, 0.8, 100.0)];
        let kept = non_max_suppression(candidates, 0.45, 100);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.8);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let candidates = vec![det(0, 0.9, 0.0), det(4, 0.8, 1.0)];
        let kept = non_max_suppression(candidates, 0.45, 100);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_caps_output_length() {
        let candidates = (0..10).map(|i| det(0, 0.9, i as f32 * 50.0)).collect();
        let kept = non_max_suppression(candidates, 0.45, 3);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let err = OnnxDetectorLoader::new()
            .load(Path::new("definitely/not/here.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
