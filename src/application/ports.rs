use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::RgbImage;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use crate::domain::{
    detection::Detection,
    errors::DomainResult,
    model::{Confidence, ModelId},
    stream::StreamEvent,
};

/// A loaded detection model, ready to take frames. Implementations own the
/// inference session; callers serialize access through [`SharedDetector`].
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage, confidence: Confidence) -> anyhow::Result<Vec<Detection>>;
}

pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

/// Turns a weights file into a detector. Separated from the cache so tests
/// can count how often the file is actually read.
pub trait DetectorLoader: Send + Sync {
    fn load(&self, path: &Path) -> DomainResult<Box<dyn Detector>>;
}

/// Pull-based frame producer shared by the video and webcam drivers.
/// `Ok(None)` means end-of-stream (video only; a camera never ends on its own).
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;
}

/// What the stream runner should open. The uploaded video keeps its temp file
/// alive for exactly as long as the decoder needs it.
pub enum StreamSourceSpec {
    Video { file: NamedTempFile },
    Webcam { device: String },
}

#[async_trait]
pub trait ModelCatalogPort: Send + Sync {
    async fn list_models(&self) -> DomainResult<Vec<ModelId>>;
    /// Maps a selected weight filename to a validated [`ModelId`].
    async fn resolve(&self, file_name: &str) -> DomainResult<ModelId>;
}

#[async_trait]
pub trait StreamPort: Send + Sync {
    /// Replaces any running stream with a new one. The source is opened
    /// before the worker starts, so open failures surface here rather than
    /// as a stream event.
    async fn start(
        &self,
        source: StreamSourceSpec,
        detector: SharedDetector,
        confidence: Confidence,
    ) -> DomainResult<()>;
    /// Signals the worker loop to exit; it observes the flag within one
    /// frame-read cycle.
    async fn stop(&self) -> DomainResult<()>;
    async fn subscribe(&self) -> DomainResult<broadcast::Receiver<StreamEvent>>;
}
