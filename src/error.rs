use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BgError {
    #[error("No image uploaded")]
    NoImage,

    #[error("Invalid file")]
    InvalidFile,

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Request body exceeds {max} bytes")]
    BodyTooLarge { max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgError {
    /// Errors that make `/process/local` fall back to the corner heuristic
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            BgError::ModelNotFound(_) | BgError::ModelLoad(_) | BgError::Inference(_)
        )
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for BgError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BgError::NoImage => (StatusCode::BAD_REQUEST, "NO_IMAGE"),
            BgError::InvalidFile => (StatusCode::BAD_REQUEST, "INVALID_FILE"),
            BgError::ImageTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "IMAGE_TOO_LARGE"),
            BgError::BodyTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "BODY_TOO_LARGE"),
            BgError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            BgError::Decode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "DECODE_ERROR"),
            BgError::ModelNotFound(_) => (StatusCode::NOT_FOUND, "MODEL_NOT_FOUND"),
            BgError::ModelLoad(_) => (StatusCode::INTERNAL_SERVER_ERROR, "MODEL_LOAD_ERROR"),
            BgError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_ERROR"),
            BgError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            BgError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            BgError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
