use std::time::Instant;

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::application::ports::Detector;
use crate::domain::detection::Detection;
use crate::domain::model::Confidence;
use crate::domain::stream::FrameMeta;

/// Fixed display size for streamed frames: 720 wide at 16:9.
pub const DISPLAY_WIDTH: u32 = 720;
pub const DISPLAY_HEIGHT: u32 = 405;

/// Box colors cycled by class id.
const PALETTE: [[u8; 3]; 6] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 204, 0],
    [72, 249, 10],
    [61, 219, 255],
    [200, 100, 255],
];

/// Shared video/webcam path: resize to the fixed display size, detect,
/// draw boxes, encode for the page. `FrameMeta::fps_est` is left at zero;
/// the stream worker owns the frame-rate estimate.
pub fn render_frame(
    frame: &RgbImage,
    confidence: Confidence,
    detector: &mut dyn Detector,
) -> anyhow::Result<(FrameMeta, Vec<u8>)> {
    let mut display = image::imageops::resize(frame, DISPLAY_WIDTH, DISPLAY_HEIGHT, FilterType::Triangle);

    let t = Instant::now();
    let detections = detector.detect(&display, confidence)?;
    let infer_ms = t.elapsed().as_secs_f32() * 1000.0;

    annotate(&mut display, &detections);
    let jpeg = encode_jpeg(&display, 80)?;

    let meta = FrameMeta {
        width: DISPLAY_WIDTH,
        height: DISPLAY_HEIGHT,
        infer_ms,
        fps_est: 0.0,
        detections,
    };
    Ok((meta, jpeg))
}

/// Draws a two-pixel hollow rectangle per detection. With no detections the
/// image is left untouched.
pub fn annotate(image: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    for det in detections {
        let x1 = det.x1.clamp(0.0, w - 1.0);
        let y1 = det.y1.clamp(0.0, h - 1.0);
        let x2 = det.x2.clamp(0.0, w - 1.0);
        let y2 = det.y2.clamp(0.0, h - 1.0);
        let bw = (x2 - x1).max(1.0) as u32;
        let bh = (y2 - y1).max(1.0) as u32;
        let color = Rgb(PALETTE[det.class_id % PALETTE.len()]);

        let outer = Rect::at(x1 as i32, y1 as i32).of_size(bw, bh);
        draw_hollow_rect_mut(image, outer, color);
        if bw > 2 && bh > 2 {
            let inner = Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(bw - 2, bh - 2);
            draw_hollow_rect_mut(image, inner, color);
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    enc.encode(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records the dimensions of every frame it is handed.
    struct RecordingDetector {
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
        results: Vec<Detection>,
    }

    impl Detector for RecordingDetector {
        fn detect(&mut self, frame: &RgbImage, _: Confidence) -> anyhow::Result<Vec<Detection>> {
            self.seen.lock().unwrap().push((frame.width(), frame.height()));
            Ok(self.results.clone())
        }
    }

    fn conf() -> Confidence {
        Confidence::from_percent(50).unwrap()
    }

    #[test]
    fn frames_of_any_resolution_are_resized_before_detection() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut det = RecordingDetector { seen: seen.clone(), results: vec![] };

        for (w, h) in [(100, 100), (1920, 1080), (333, 777), (720, 405)] {
            let frame = RgbImage::new(w, h);
            render_frame(&frame, conf(), &mut det).unwrap();
        }

        for dims in seen.lock().unwrap().iter() {
            assert_eq!(*dims, (DISPLAY_WIDTH, DISPLAY_HEIGHT));
        }
    }

    #[test]
    fn zero_detections_leave_pixels_untouched() {
        let mut img = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 7]));
        let original = img.clone();
        annotate(&mut img, &[]);
        assert_eq!(img.as_raw(), original.as_raw());
    }

    #[test]
    fn detections_change_pixels_inside_the_frame() {
        let mut img = RgbImage::new(64, 48);
        let det = Detection {
            x1: 10.0,
            y1: 10.0,
            x2: 40.0,
            y2: 30.0,
            score: 0.9,
            class_id: 0,
            label: "airplane".into(),
        };
        annotate(&mut img, &[det]);
        assert_ne!(img.as_raw(), RgbImage::new(64, 48).as_raw());
    }

    #[test]
    fn render_frame_reports_display_dimensions_and_detections() {
        let det = Detection {
            x1: 1.0,
            y1: 1.0,
            x2: 20.0,
            y2: 20.0,
            score: 0.7,
            class_id: 4,
            label: "airplane".into(),
        };
        let mut detector = RecordingDetector {
            seen: Arc::new(Mutex::new(Vec::new())),
            results: vec![det],
        };

        let frame = RgbImage::new(1280, 720);
        let (meta, jpeg) = render_frame(&frame, conf(), &mut detector).unwrap();

        assert_eq!((meta.width, meta.height), (DISPLAY_WIDTH, DISPLAY_HEIGHT));
        assert_eq!(meta.detections.len(), 1);
        assert!(!jpeg.is_empty());
    }
}
