use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Centralized error types for consistent API error handling.
///
/// The variants mirror the generation lifecycle outcomes: a `failed` record
/// is terminal (`GenerationFailed`), a `pending` record whose payload no
/// longer validates flips to failed (`InvalidCachedData`), and any status
/// the state machine does not recognize is data corruption
/// (`UnhandledStatus`), not a user error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid cached data: {0}")]
    InvalidCachedData(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Unhandled status: {0}")]
    UnhandledStatus(String),

    #[error("Generation in flight: {0}")]
    GenerationInFlight(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("LLM service error: {0}")]
    LlmError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCachedData(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::GenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnhandledStatus(_) => StatusCode::BAD_REQUEST,
            ApiError::GenerationInFlight(_) => StatusCode::ACCEPTED,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::LlmError(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::NotFound(_)
            | ApiError::ValidationError(_)
            | ApiError::GenerationFailed(_)
            | ApiError::UnhandledStatus(_)
            | ApiError::GenerationInFlight(_)
            | ApiError::InvalidCachedData(_)
            | ApiError::Forbidden(_) => self.to_string(),
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::LlmError(_) => {
                "AI service temporarily unavailable. Please try again.".to_string()
            }
            ApiError::DatabaseError(_) => {
                "Database operation failed. Please try again.".to_string()
            }
        }
    }

    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) | ApiError::GenerationInFlight(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Request ended without result"
                );
            }
            ApiError::ValidationError(_)
            | ApiError::UnhandledStatus(_)
            | ApiError::Unauthorized
            | ApiError::Forbidden(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Request rejected"
                );
            }
            ApiError::InvalidCachedData(_)
            | ApiError::GenerationFailed(_)
            | ApiError::LlmError(_)
            | ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Request failed"
                );
            }
        }

        let status = self.status_code();
        let message = self.client_message();
        (status, Json(ApiResponse::error(message)))
    }

    /// Simple conversion without context (for handlers that have nothing to add)
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("fetch_flashcards", "flashcard set").with_id("123");

        assert_eq!(context.operation, "fetch_flashcards");
        assert_eq!(context.resource_type, "flashcard set");
        assert_eq!(context.resource_id, Some("123".to_string()));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::InvalidCachedData("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::GenerationFailed("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::UnhandledStatus("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::GenerationInFlight("x".into()).status_code(),
            StatusCode::ACCEPTED
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_sensitive_errors_are_masked() {
        let err = ApiError::DatabaseError(anyhow::anyhow!("UNIQUE constraint failed: secret"));
        assert!(!err.client_message().contains("secret"));

        let err = ApiError::LlmError("api key sk-123 rejected".into());
        assert!(!err.client_message().contains("sk-123"));
    }
}
