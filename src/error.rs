use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::mail::MailError;

/// FieldError
///
/// A single field-level validation failure, e.g. `{"field": "year", "code": "year", ...}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// Body of every 400 produced by payload validation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationErrorResponse {
    pub errors: Vec<FieldError>,
}

/// ApiError
///
/// The single error type returned by handlers. Each variant maps onto one HTTP status;
/// server-side failures are logged and reported without internal detail.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed")]
    Validation(ValidationErrorResponse),

    #[error("{0}")]
    BadRequest(String),

    #[error("authentication credentials were not provided or are invalid")]
    Unauthorized,

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("mail delivery failed: {0}")]
    Mail(#[from] MailError),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Shorthand for a validation failure on a single field.
    pub fn field(field: &str, code: &str, message: impl Into<String>) -> Self {
        ApiError::Validation(ValidationErrorResponse {
            errors: vec![FieldError {
                field: field.to_string(),
                message: message.into(),
                code: code.to_string(),
            }],
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
            ApiError::NotFound(_) => detail(StatusCode::NOT_FOUND, &self.to_string()),
            ApiError::BadRequest(ref msg) => detail(StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => detail(StatusCode::UNAUTHORIZED, &self.to_string()),
            ApiError::Forbidden => detail(StatusCode::FORBIDDEN, &self.to_string()),
            // Unique constraints (slug, username, one review per author) surface as client errors.
            ApiError::Database(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
                tracing::warn!(constraint = ?db.constraint(), "unique violation");
                detail(StatusCode::BAD_REQUEST, "an object with these unique fields already exists")
            }
            ApiError::Database(ref e) => {
                tracing::error!("database error: {:?}", e);
                internal()
            }
            ApiError::Mail(ref e) => {
                tracing::error!("mail error: {:?}", e);
                internal()
            }
            ApiError::Token(ref e) => {
                tracing::error!("token signing error: {:?}", e);
                internal()
            }
        }
    }
}

fn detail(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "detail": msg }))).into_response()
}

fn internal() -> Response {
    detail(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
