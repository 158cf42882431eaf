use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::detector::DetectorParams;

pub const DEFAULT_MODEL_PATH: &str = "best.torchscript";
const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must be between 0 and 1, got {value}")]
    OutOfRange { key: &'static str, value: f32 },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub detector: DetectorParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_upload_bytes: MAX_UPLOAD_SIZE,
            detector: DetectorParams::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let detector = DetectorParams {
            image_size: parse_or(&lookup, "IMAGE_SIZE", defaults.detector.image_size)?,
            conf_threshold: unit_interval(
                "CONF_THRESHOLD",
                parse_or(&lookup, "CONF_THRESHOLD", defaults.detector.conf_threshold)?,
            )?,
            iou_threshold: unit_interval(
                "IOU_THRESHOLD",
                parse_or(&lookup, "IOU_THRESHOLD", defaults.detector.iou_threshold)?,
            )?,
            max_detections: parse_or(&lookup, "MAX_DETECTIONS", defaults.detector.max_detections)?,
        };

        Ok(Self {
            model_path: lookup("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            labels_path: lookup("LABELS_PATH")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            detector,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn unit_interval(key: &'static str, value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange { key, value })
    }
}
