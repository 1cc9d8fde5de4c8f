use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    application::{
        dto::{ImageDetectRequest, ImageDetectionResult},
        model_cache::ModelCache,
        ports::{ModelCatalogPort, SharedDetector, StreamPort, StreamSourceSpec},
        render,
    },
    domain::{
        errors::{DomainError, DomainResult},
        model::{Confidence, ModelId},
        source::{image_content_type, is_supported_image, IMAGE_EXTENSIONS},
        stream::{summarize_detections, StreamEvent},
    },
};

/// One-shot inference over an uploaded still image.
#[derive(Clone)]
pub struct DetectionService {
    catalog: Arc<dyn ModelCatalogPort>,
    cache: Arc<ModelCache>,
}

impl DetectionService {
    pub fn new(catalog: Arc<dyn ModelCatalogPort>, cache: Arc<ModelCache>) -> Self {
        Self { catalog, cache }
    }

    pub async fn list_models(&self) -> DomainResult<Vec<ModelId>> {
        self.catalog.list_models().await
    }

    /// Runs a single forward pass at the upload's native size and returns the
    /// annotated frame plus per-detection geometry. When nothing is detected
    /// the original upload bytes are echoed back untouched.
    pub async fn detect_image(&self, req: ImageDetectRequest) -> DomainResult<ImageDetectionResult> {
        if !is_supported_image(&req.file_name) {
            return Err(DomainError::InvalidInput(format!(
                "unsupported image type '{}'; expected one of: {}",
                req.file_name,
                IMAGE_EXTENSIONS.join(", ")
            )));
        }

        let model = self.catalog.resolve(&req.model_file).await?;
        let confidence = Confidence::from_percent(req.confidence_percent)?;

        let decoded = image::load_from_memory(&req.data)
            .map_err(|e| DomainError::InvalidInput(format!("could not decode image: {e}")))?
            .to_rgb8();

        // Model load and inference are CPU-bound; keep them off the runtime.
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let detector = cache.get(&model)?;
            let detections = {
                let mut guard = detector
                    .lock()
                    .map_err(|_| DomainError::OperationFailed("detector lock poisoned".into()))?;
                guard
                    .detect(&decoded, confidence)
                    .map_err(|e| DomainError::OperationFailed(format!("inference failed: {e}")))?
            };
            debug!(summary = %summarize_detections(&detections), "image inference done");

            let (image, content_type) = if detections.is_empty() {
                // Nothing to draw: the displayed image is the input, bit for bit.
                (req.data, image_content_type(&req.file_name).to_string())
            } else {
                let mut annotated = decoded.clone();
                render::annotate(&mut annotated, &detections);
                let jpeg = render::encode_jpeg(&annotated, 90)
                    .map_err(|e| DomainError::OperationFailed(format!("encode failed: {e}")))?;
                (jpeg, "image/jpeg".to_string())
            };

            Ok(ImageDetectionResult {
                width: decoded.width(),
                height: decoded.height(),
                detections,
                image,
                content_type,
            })
        })
        .await
        .map_err(|_| DomainError::OperationFailed("detection task aborted".into()))?
    }
}

/// Orchestrates the video and webcam drivers: resolves the model, maps the
/// slider value, and hands a ready detector to the stream runner.
#[derive(Clone)]
pub struct StreamService {
    stream: Arc<dyn StreamPort>,
    catalog: Arc<dyn ModelCatalogPort>,
    cache: Arc<ModelCache>,
    webcam_device: String,
}

impl StreamService {
    pub fn new(
        stream: Arc<dyn StreamPort>,
        catalog: Arc<dyn ModelCatalogPort>,
        cache: Arc<ModelCache>,
    ) -> Self {
        Self {
            stream,
            catalog,
            cache,
            webcam_device: "/dev/video0".into(),
        }
    }

    pub async fn start_video(
        &self,
        model_file: &str,
        confidence_percent: u8,
        video: NamedTempFile,
    ) -> DomainResult<()> {
        let (detector, confidence) = self.prepare(model_file, confidence_percent).await?;
        self.stream
            .start(StreamSourceSpec::Video { file: video }, detector, confidence)
            .await
    }

    pub async fn start_webcam(&self, model_file: &str, confidence_percent: u8) -> DomainResult<()> {
        let (detector, confidence) = self.prepare(model_file, confidence_percent).await?;
        let device = self.webcam_device.clone();
        self.stream
            .start(StreamSourceSpec::Webcam { device }, detector, confidence)
            .await
    }

    pub async fn stop(&self) -> DomainResult<()> {
        self.stream.stop().await
    }

    pub async fn subscribe(&self) -> DomainResult<broadcast::Receiver<StreamEvent>> {
        self.stream.subscribe().await
    }

    async fn prepare(
        &self,
        model_file: &str,
        confidence_percent: u8,
    ) -> DomainResult<(SharedDetector, Confidence)> {
        let model = self.catalog.resolve(model_file).await?;
        let confidence = Confidence::from_percent(confidence_percent)?;

        let cache = self.cache.clone();
        let detector = tokio::task::spawn_blocking(move || cache.get(&model))
            .await
            .map_err(|_| DomainError::OperationFailed("model load task aborted".into()))??;
        Ok((detector, confidence))
    }
}
