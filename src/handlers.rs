use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::audio::FfmpegDecoder;
use crate::error::AppError;
use crate::inference::InferenceEngine;
use crate::models::HealthResponse;

const FILE_FIELD: &str = "file";

/// Read-only state shared by every request.
pub struct AppState {
    pub model_name: String,
    pub decoder: FfmpegDecoder,
    pub engine: InferenceEngine,
}

impl AppState {
    pub fn new(
        model_name: impl Into<String>,
        decoder: FfmpegDecoder,
        engine: InferenceEngine,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            decoder,
            engine,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

/// Collects the bytes of the `file` field, draining anything else.
async fn read_file_field(payload: &mut Multipart) -> Result<Option<Vec<u8>>, AppError> {
    let mut file: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::Unexpected(e.to_string()))?;
        let is_file = field.content_disposition().get_name() == Some(FILE_FIELD);

        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| AppError::Unexpected(e.to_string()))?;
            if is_file {
                buf.extend_from_slice(&data);
            }
        }

        if is_file && file.is_none() {
            file = Some(buf);
        }
    }

    Ok(file)
}

pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let request_id = Uuid::new_v4();
    let data = read_file_field(&mut payload)
        .await?
        .ok_or(AppError::MissingFile)?;
    log::info!("[{}] received {} bytes", request_id, data.len());

    let worker = state.clone();
    let outcome = web::block(move || {
        let samples = worker.decoder.decode(&data)?;
        log::debug!("[{}] decoded {} samples", request_id, samples.len());
        worker.engine.predict(&samples)
    })
    .await
    .map_err(|e| AppError::Unexpected(e.to_string()))?;

    match outcome {
        Ok(response) => {
            log::info!(
                "[{}] primary={} confidence={:.2}",
                request_id,
                response.primary,
                response.confidence
            );
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            log::warn!("[{}] {} failure: {}", request_id, e.kind(), e);
            Err(e)
        }
    }
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        model: state.model_name.clone(),
    })
}
