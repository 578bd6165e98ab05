use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorDetail;

pub const FFMPEG_MISSING: &str =
    "ffmpeg is not installed or not in PATH. Install ffmpeg to decode webm/opus.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", FFMPEG_MISSING)]
    DecoderUnavailable,

    #[error("ffmpeg conversion failed: {0}")]
    DecodeFailed(String),

    #[error("could not stage audio: {0}")]
    Staging(#[from] std::io::Error),

    #[error("could not read decoded audio: {0}")]
    InvalidWav(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("field `file` is required")]
    MissingFile,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Unexpected(String),
}

impl From<hound::Error> for AppError {
    fn from(e: hound::Error) -> Self {
        AppError::InvalidWav(e.to_string())
    }
}

impl AppError {
    /// Short tag for log lines. Never sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DecoderUnavailable => "decoder_unavailable",
            AppError::DecodeFailed(_) => "decode_failed",
            AppError::Staging(_) => "staging",
            AppError::InvalidWav(_) => "invalid_wav",
            AppError::ModelLoad(_) => "model_load",
            AppError::Inference(_) => "inference",
            AppError::MissingFile => "missing_file",
            AppError::Config(_) => "config",
            AppError::Unexpected(_) => "unexpected",
        }
    }

    /// The text returned in the `detail` field.
    ///
    /// Decode-stage failures carry their own message; everything else is
    /// wrapped in the generic processing failure.
    pub fn detail(&self) -> String {
        match self {
            AppError::DecoderUnavailable
            | AppError::DecodeFailed(_)
            | AppError::Staging(_)
            | AppError::InvalidWav(_)
            | AppError::MissingFile => self.to_string(),
            _ => format!("Failed to process audio: {}", self),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorDetail {
            detail: self.detail(),
        })
    }
}
