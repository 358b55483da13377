use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured error response returned by the API.
/// Carries enough context for a client to show the failure as an answer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "execution_failed")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which request field caused the error (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what to try next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const SYNTHESIS_FAILED: &str = "synthesis_failed";
    pub const EXECUTION_FAILED: &str = "execution_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Why a single pipeline invocation was aborted.
///
/// No variant is retried: the invocation ends and the caller decides how to
/// present the failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The text-generation capability was unreachable or produced nothing usable.
    #[error("query synthesis failed: {0}")]
    Synthesis(String),
    /// The generated query was rejected or failed in the event store.
    #[error("query execution failed: {0}")]
    Execution(String),
    /// The store answered with something that is not a row document.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Synthesis(_) => codes::SYNTHESIS_FAILED,
            PipelineError::Execution(_) => codes::EXECUTION_FAILED,
            PipelineError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}
