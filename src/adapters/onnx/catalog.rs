use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::ModelCatalogPort;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::{ModelId, DETECTION_MODELS};

/// Resolves the fixed weight-file table against a weights directory.
pub struct OnnxModelCatalog {
    weights_dir: PathBuf,
}

impl OnnxModelCatalog {
    pub fn new(weights_dir: impl Into<PathBuf>) -> Self {
        Self { weights_dir: weights_dir.into() }
    }

    fn model_id(&self, file_name: &str) -> ModelId {
        let name = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.to_string());
        ModelId {
            name,
            onnx_path: self.weights_dir.join(file_name).to_string_lossy().to_string(),
        }
    }
}

#[async_trait]
impl ModelCatalogPort for OnnxModelCatalog {
    async fn list_models(&self) -> DomainResult<Vec<ModelId>> {
        Ok(DETECTION_MODELS.iter().map(|f| self.model_id(f)).collect())
    }

    async fn resolve(&self, file_name: &str) -> DomainResult<ModelId> {
        if !DETECTION_MODELS.contains(&file_name) {
            return Err(DomainError::InvalidInput(format!(
                "'{file_name}' is not a selectable model"
            )));
        }
        let model = self.model_id(file_name);
        if !Path::new(&model.onnx_path).exists() {
            return Err(DomainError::NotFound(format!(
                "model file not found: {}",
                model.onnx_path
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_the_full_table() {
        let catalog = OnnxModelCatalog::new("weights");
        let models = catalog.list_models().await.unwrap();
        assert_eq!(models.len(), DETECTION_MODELS.len());
        assert_eq!(models[0].name, "yolov8n");
    }

    #[tokio::test]
    async fn resolve_rejects_unknown_filenames() {
        let catalog = OnnxModelCatalog::new("weights");
        let err = catalog.resolve("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn resolve_requires_the_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = OnnxModelCatalog::new(dir.path());

        let err = catalog.resolve("yolov8n.onnx").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        std::fs::write(dir.path().join("yolov8n.onnx"), b"weights").unwrap();
        let model = catalog.resolve("yolov8n.onnx").await.unwrap();
        assert_eq!(model.name, "yolov8n");
    }
}
