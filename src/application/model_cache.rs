use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::application::ports::{DetectorLoader, SharedDetector};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::ModelId;

/// Single-slot detector cache. The dashboard works with one selected model at
/// a time, so caching more than the last path would only hold dead sessions.
/// Re-requesting the same path hands back the same shared instance without
/// touching the filesystem; a different path drops the old detector and loads.
pub struct ModelCache {
    loader: Arc<dyn DetectorLoader>,
    slot: Mutex<Option<CachedModel>>,
}

struct CachedModel {
    path: PathBuf,
    detector: SharedDetector,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn DetectorLoader>) -> Self {
        Self { loader, slot: Mutex::new(None) }
    }

    pub fn get(&self, model: &ModelId) -> DomainResult<SharedDetector> {
        let path = PathBuf::from(&model.onnx_path);
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| DomainError::OperationFailed("model cache lock poisoned".into()))?;

        if let Some(cached) = slot.as_ref() {
            if cached.path == path {
                return Ok(cached.detector.clone());
            }
        }

        info!(model = %model.name, path = %model.onnx_path, "loading detector");
        let detector = self.loader.load(&path)?;
        let shared: SharedDetector = Arc::new(Mutex::new(detector));
        *slot = Some(CachedModel { path, detector: shared.clone() });
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::RgbImage;

    use crate::application::ports::Detector;
    use crate::domain::detection::Detection;
    use crate::domain::model::Confidence;

    struct NullDetector;

    impl Detector for NullDetector {
        fn detect(&mut self, _: &RgbImage, _: Confidence) -> anyhow::Result<Vec<Detection>> {
            Ok(vec![])
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl DetectorLoader for CountingLoader {
        fn load(&self, _path: &Path) -> DomainResult<Box<dyn Detector>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullDetector))
        }
    }

    fn model(path: &str) -> ModelId {
        ModelId { name: "test".into(), onnx_path: path.into() }
    }

    #[test]
    fn same_path_loads_once_and_shares_the_instance() {
        let loader = Arc::new(CountingLoader { loads: AtomicUsize::new(0) });
        let cache = ModelCache::new(loader.clone());

        let a = cache.get(&model("weights/yolov8n.onnx")).unwrap();
        let b = cache.get(&model("weights/yolov8n.onnx")).unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn path_change_triggers_exactly_one_more_load() {
        let loader = Arc::new(CountingLoader { loads: AtomicUsize::new(0) });
        let cache = ModelCache::new(loader.clone());

        cache.get(&model("weights/yolov8n.onnx")).unwrap();
        cache.get(&model("weights/yolov8s.onnx")).unwrap();
        cache.get(&model("weights/yolov8s.onnx")).unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn loader_failure_is_propagated_and_not_cached() {
        struct FailingLoader;
        impl DetectorLoader for FailingLoader {
            fn load(&self, path: &Path) -> DomainResult<Box<dyn Detector>> {
                Err(DomainError::NotFound(format!("model file not found: {}", path.display())))
            }
        }

        let cache = ModelCache::new(Arc::new(FailingLoader));
        assert!(cache.get(&model("missing.onnx")).is_err());
        assert!(cache.get(&model("missing.onnx")).is_err());
    }
}
