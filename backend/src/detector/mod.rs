pub mod labels;
#[cfg(feature = "torch")]
pub mod torch;
pub mod yolo;

use std::sync::Arc;

use image::DynamicImage;

use crate::config::ServiceConfig;
pub use labels::{LabelError, LabelTable};

/// Engine output for a single object, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    /// `[xmin, ymin, xmax, ymax]`
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub image_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            image_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("Model lock poisoned")]
    LockPoisoned,
    #[error("Label table error: {0}")]
    Labels(#[from] LabelError),
    #[error("No inference backend compiled in; rebuild with the `torch` feature")]
    NoBackend,
}

/// An object detector the HTTP layer can run uploads through.
pub trait Detector: Send + Sync {
    /// Detections in the order the engine produced them.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, InferenceError>;

    fn labels(&self) -> Option<&LabelTable>;
}

/// The process-wide model handle. `None` means the service is up but not ready.
pub type ModelHandle = Option<Arc<dyn Detector>>;

/// Loads the detector named by `config`, logging instead of failing so the
/// server can still come up without a model.
pub fn load_model(config: &ServiceConfig) -> ModelHandle {
    if !config.model_path.exists() {
        log::warn!(
            "Model file not found at '{}'. The API will start, but /inspect/ will fail.",
            config.model_path.display()
        );
        return None;
    }

    match load_backend(config) {
        Ok(detector) => {
            log::info!(
                "Successfully loaded detection model from: {}",
                config.model_path.display()
            );
            Some(detector)
        }
        Err(e) => {
            log::error!(
                "Failed to load detection model from '{}': {}",
                config.model_path.display(),
                e
            );
            None
        }
    }
}

fn load_labels(config: &ServiceConfig) -> Result<Option<LabelTable>, InferenceError> {
    match &config.labels_path {
        Some(path) => {
            let table = LabelTable::load(path)?;
            log::info!("Loaded {} class labels from {}", table.len(), path.display());
            Ok(Some(table))
        }
        None => {
            log::warn!("LABELS_PATH not set; detections will be reported as class_<id>");
            Ok(None)
        }
    }
}

#[cfg(feature = "torch")]
fn load_backend(config: &ServiceConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    let labels = load_labels(config)?;
    let model = torch::TorchDetector::load(&config.model_path, config.detector.clone(), labels)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "torch"))]
fn load_backend(config: &ServiceConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    load_labels(config)?;
    Err(InferenceError::NoBackend)
}
