use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::pipeline::PipelineError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Offending input values, echoed back for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A request value failed validation; `details` echoes what was rejected.
    #[error("Invalid request: {message}")]
    Validation {
        message: String,
        details: serde_json::Value,
    },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Validation { message, details } => {
                (StatusCode::BAD_REQUEST, message, Some(details))
            }
            AppError::Pipeline(err) => {
                tracing::error!("Pipeline failure: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.public_message(), None)
            }
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            axum::Json(ErrorResponse {
                error: message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::extraction::ExtractionError;

    #[test]
    fn test_validation_error_is_400() {
        let err = AppError::Validation {
            message: "bad hour".to_string(),
            details: serde_json::json!({ "forecast_hour": 72 }),
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_is_404() {
        let err = AppError::NotFound("nothing".to_string());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_pipeline_error_is_500() {
        let err = AppError::from(PipelineError::Extraction(ExtractionError::Failed {
            code: 1,
            stderr: "Traceback: secret path".to_string(),
        }));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
