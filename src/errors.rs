use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { field: &'static str, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("bookings can only be cancelled at least {lead_hours} hours in advance")]
    CancellationTooLate {
        hours_until_booking: f64,
        lead_hours: i64,
    },

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Machine-readable reason attached to error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict { code, .. } => code,
            AppError::CancellationTooLate { .. } => "cancellation_too_late",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) | AppError::Unexpected(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::BAD_REQUEST,
            AppError::CancellationTooLate { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let details = match &self {
            AppError::Validation { field, .. } => serde_json::json!({ "field": field }),
            AppError::CancellationTooLate {
                hours_until_booking,
                lead_hours,
            } => serde_json::json!({
                "hoursUntilBooking": hours_until_booking,
                "requiredHours": lead_hours,
            }),
            _ => serde_json::Value::Null,
        };

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database failure while handling request");
                "internal server error".to_string()
            }
            AppError::Unexpected(e) => {
                tracing::error!(error = %e, "unexpected failure while handling request");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "success": false,
            "message": message,
            "code": self.code(),
            "details": details,
        });
        (status, axum::Json(body)).into_response()
    }
}
