use actix_multipart::{Multipart, MultipartError};
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use shared::{DetectionRecord, InspectionResponse, StatusResponse};

use crate::detector::{Detector, InferenceError};
use crate::normalizer::normalize;
use crate::state::AppState;

pub const MODEL_NOT_LOADED: &str =
    "Model not loaded. Cannot perform inspection. Please check server logs.";
pub const MISSING_FILE_FIELD: &str = "Missing multipart field 'file'.";
const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("{0}")]
    Upload(#[from] MultipartError),
    #[error("upload exceeds the {0} byte limit")]
    TooLarge(usize),
    #[error("{0}")]
    Process(#[from] ProcessError),
    #[error("{0}")]
    Blocking(#[from] actix_web::error::BlockingError),
}

/// Failures inside the blocking decode and inference step. Must stay `Send`.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    Decode(#[from] image::ImageError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
}

struct Upload {
    filename: String,
    data: Vec<u8>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(read_root)))
        .service(web::resource("/inspect/").route(web::post().to(inspect)));
}

async fn read_root(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse::from(state.status()))
}

async fn inspect(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let Some(model) = state.model.clone() else {
        warn!("Inspection requested but no model is loaded");
        return HttpResponse::Ok().json(InspectionResponse::error(MODEL_NOT_LOADED));
    };

    let upload = match read_upload(payload, state.max_upload_bytes).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            warn!("Inspection request without a '{}' field", FILE_FIELD);
            return HttpResponse::UnprocessableEntity()
                .json(InspectionResponse::error(MISSING_FILE_FIELD));
        }
        Err(e) => return processing_error(None, e),
    };

    let filename = upload.filename;
    let data = upload.data;
    let result = web::block(move || run_inspection(&*model, &data))
        .await
        .map_err(InspectError::from)
        .and_then(|inner| inner.map_err(InspectError::from));

    match result {
        Ok(detections) => {
            info!("Inspected {}: {} detection(s)", filename, detections.len());
            HttpResponse::Ok().json(InspectionResponse::from_detections(filename, detections))
        }
        Err(e) => processing_error(Some(&filename), e),
    }
}

fn processing_error(filename: Option<&str>, e: InspectError) -> HttpResponse {
    error!(
        "Failed to process upload {}: {:?}",
        filename.unwrap_or("<unread>"),
        e
    );
    HttpResponse::Ok().json(InspectionResponse::error(format!(
        "An error occurred while processing the image: {}",
        e
    )))
}

fn run_inspection(
    model: &dyn Detector,
    image_data: &[u8],
) -> Result<Vec<DetectionRecord>, ProcessError> {
    let image = image::load_from_memory(image_data)?;
    let raw = model.detect(&image)?;
    Ok(normalize(&raw, model.labels()))
}

/// Reads the first `file` field, skipping any others.
async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<Option<Upload>, InspectError> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(FILE_FIELD) {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > max_bytes {
                return Err(InspectError::TooLarge(max_bytes));
            }
            data.extend_from_slice(&chunk);
        }
        return Ok(Some(Upload { filename, data }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{LabelTable, RawDetection};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn assert_send<T: Send>() {}

    struct OneBox;

    impl Detector for OneBox {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, InferenceError> {
            Ok(vec![RawDetection {
                class_id: 3,
                confidence: 0.5,
                bbox: [1.0, 2.0, 3.0, 4.0],
            }])
        }

        fn labels(&self) -> Option<&LabelTable> {
            None
        }
    }

    #[test]
    fn blocking_step_result_is_send() {
        assert_send::<Result<Vec<DetectionRecord>, ProcessError>>();
    }

    #[test]
    fn run_inspection_decodes_and_normalizes() {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        let records = run_inspection(&OneBox, bytes.get_ref()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].class_name, "class_3");
    }

    #[test]
    fn run_inspection_reports_decode_errors() {
        assert!(matches!(
            run_inspection(&OneBox, b"plain text"),
            Err(ProcessError::Decode(_))
        ));
    }
}
