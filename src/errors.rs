// ⚠️ HTTP Errors - one enum, one status code per variant
//
// Library layers return anyhow::Result; handlers convert into `Error`, which
// logs the full detail and answers with {"error": "<user message>"}.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::categorize::CategorizeError;
use crate::ocr::OcrError;
use crate::pipeline::PipelineError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Missing, malformed or expired credentials
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Unique constraint, e.g. an email already registered
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Upload is not a JPEG or PNG
    #[error("{message}")]
    UnsupportedMediaType { message: String },

    #[error("Upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Readable request that could not be turned into a transaction
    #[error("{message}")]
    Unprocessable { message: String },

    /// OCR or categorization provider failed
    #[error("Upstream {service} failed: {message}")]
    Upstream { service: String, message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message
                .clone()
                .unwrap_or_else(|| "Authentication required".to_string()),
            Error::Upstream { service, .. } => format!("The {} service is unavailable, please retry", service),
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Unauthenticated { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            Error::Conflict { .. } | Error::Unprocessable { .. } => {
                tracing::info!("Rejected request: {}", self);
            }
            Error::BadRequest { .. }
            | Error::NotFound { .. }
            | Error::UnsupportedMediaType { .. }
            | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(json!({ "error": self.user_message() }))).into_response()
    }
}

impl From<OcrError> for Error {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::LowConfidence { .. } => Error::Unprocessable {
                message: "OCR confidence too low, no readable text found in the image".to_string(),
            },
            OcrError::Provider { provider, cause } => Error::Upstream {
                service: format!("OCR ({})", provider),
                message: format!("{:#}", cause),
            },
        }
    }
}

impl From<CategorizeError> for Error {
    fn from(err: CategorizeError) -> Self {
        Error::Upstream {
            service: "categorization".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Ocr(e) => e.into(),
            PipelineError::Categorize(e) => e.into(),
            PipelineError::MissingFields(fields) => Error::Unprocessable {
                message: format!("Could not determine {} from the document", fields.join(", ")),
            },
            PipelineError::Storage(e) => Error::Other(e),
        }
    }
}
