//! Error type returned by the explanation service and HTTP handlers.
//!
//! Every failure is rendered as
//! `{ "success": false, "error": { "code": ..., "message": ... } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::generator::GenerationError;
use crate::input::InputError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad or missing input (400).
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid access token (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Absent, or not owned by the caller (404). The two are never distinguished.
    #[error("{0}")]
    NotFound(String),

    /// Deployment problem such as a missing provider credential (503).
    #[error("{0}")]
    Configuration(String),

    /// Provider failure or schema violation (502).
    #[error("{0}")]
    Generation(String),

    /// Anything else (500).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Configuration(_) => "configuration_error",
            AppError::Generation(_) => "generation_error",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Configuration(_) => AppError::Configuration(err.to_string()),
            GenerationError::Provider(_) | GenerationError::InvalidResponse(_) => {
                AppError::Generation(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay in the log.
            AppError::Internal(err) => {
                error!(error = %err, "internal error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
