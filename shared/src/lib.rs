use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

pub const NO_DEFECTS_MESSAGE: &str = "No defects detected.";

/// Whether the detector was loaded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ModelStatus {
    #[strum(serialize = "Welcome to the Defect Detection API! Model loaded.")]
    Loaded,
    #[strum(serialize = "Welcome to the Defect Detection API! WARNING: Model failed to load.")]
    NotLoaded,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusResponse {
    pub message: String,
}

impl From<ModelStatus> for StatusResponse {
    fn from(status: ModelStatus) -> Self {
        Self {
            message: status.to_string(),
        }
    }
}

/// One detected object, in source image pixels.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub class_name: String,
    pub confidence: f64,
    /// `[xmin, ymin, xmax, ymax]`
    pub coordinates: [f64; 4],
}

/// Body of `POST /inspect/`. Errors are reported in the body, not the status code.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum InspectionResponse {
    NoDefects {
        filename: String,
        message: String,
        detections: Vec<DetectionRecord>,
    },
    Detections {
        filename: String,
        detections: Vec<DetectionRecord>,
    },
    Error {
        error: String,
    },
}

impl InspectionResponse {
    pub fn from_detections(filename: String, detections: Vec<DetectionRecord>) -> Self {
        if detections.is_empty() {
            InspectionResponse::NoDefects {
                filename,
                message: NO_DEFECTS_MESSAGE.to_string(),
                detections,
            }
        } else {
            InspectionResponse::Detections {
                filename,
                detections,
            }
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        InspectionResponse::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InspectionResponse::Error { .. })
    }
}
