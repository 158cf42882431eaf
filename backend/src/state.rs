use std::sync::Arc;

use shared::ModelStatus;

use crate::config::ServiceConfig;
use crate::detector::{Detector, ModelHandle};

/// Shared by every worker. Built once before the server starts and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub model: ModelHandle,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(model: ModelHandle, config: &ServiceConfig) -> Self {
        Self {
            model,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn with_detector(detector: Arc<dyn Detector>) -> Self {
        Self::new(Some(detector), &ServiceConfig::default())
    }

    pub fn not_loaded() -> Self {
        Self::new(None, &ServiceConfig::default())
    }

    pub fn status(&self) -> ModelStatus {
        if self.model.is_some() {
            ModelStatus::Loaded
        } else {
            ModelStatus::NotLoaded
        }
    }
}
