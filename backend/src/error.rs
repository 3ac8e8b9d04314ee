use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::models::CollaboratorError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing required form data: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {value:?}")]
    InvalidField { field: String, value: String },
    #[error("Upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("Malformed multipart payload: {0}")]
    Multipart(#[from] actix_multipart::MultipartError),
    #[error("Unreadable image in {field}: {source}")]
    Image {
        field: &'static str,
        source: image::ImageError,
    },
    #[error("Model request failed: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_)
            | ApiError::InvalidField { .. }
            | ApiError::Multipart(_)
            | ApiError::Image { .. } => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
