use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_core::error::{self, ApiError, PipelineError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Pipeline aborted: synthesis (502), execution (422) or internal (500)
    Pipeline(PipelineError),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Pipeline(PipelineError::Synthesis(_)) => StatusCode::BAD_GATEWAY,
            AppError::Pipeline(PipelineError::Execution(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Pipeline(PipelineError::Internal(_)) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = uuid::Uuid::now_v7().to_string();

        let api_error = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => ApiError {
                error: error::codes::VALIDATION_FAILED.to_string(),
                message,
                field,
                received,
                request_id,
                docs_hint,
            },
            AppError::Pipeline(PipelineError::Internal(msg)) | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ApiError {
                    error: error::codes::INTERNAL_ERROR.to_string(),
                    message: "An internal error occurred".to_string(),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                }
            }
            AppError::Pipeline(err) => {
                tracing::warn!(code = err.code(), %request_id, "Pipeline aborted: {}", err);
                let docs_hint = match err {
                    PipelineError::Synthesis(_) => Some(
                        "The language model produced no usable query. Ask again or rephrase the question.",
                    ),
                    PipelineError::Execution(_) => Some(
                        "The generated query failed against the event store. Rephrase the question or narrow it down.",
                    ),
                    PipelineError::Internal(_) => None,
                };
                ApiError {
                    error: err.code().to_string(),
                    message: err.to_string(),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: docs_hint.map(str::to_string),
                }
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Pipeline(err)
    }
}
