use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use common::req::ErrorBody;

/// Ingress failures, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing required fields (value1, value2)")]
    MissingReadingFields,
    #[error("Missing required field (seat1)")]
    MissingSeat,
    #[error("Invalid field type ({0})")]
    InvalidField(&'static str),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Local store unavailable")]
    Store(#[source] anyhow::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
