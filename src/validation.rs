use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use chrono::{Datelike, Utc};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{ApiError, FieldError, ValidationErrorResponse};

/// Validated
///
/// Drop-in replacement for `Json<T>` that also runs the payload's `validator` rules.
/// Malformed JSON (including unknown enum values such as a bad `role`) and rule
/// violations are both rejected with a 400.
pub struct Validated<T>(pub T);

impl<T, S> FromRequest<S> for Validated<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(payload) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::BadRequest(rejection.body_text()))?;

        payload
            .validate()
            .map_err(|errors| ApiError::Validation(convert_validation_errors(&errors)))?;

        Ok(Validated(payload))
    }
}

pub fn convert_validation_errors(errors: &ValidationErrors) -> ValidationErrorResponse {
    let mut result = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors.iter() {
            result.push(FieldError {
                field: field.to_string(),
                message: error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Validation failed for field '{field}'")),
                code: error.code.to_string(),
            });
        }
    }
    // HashMap iteration order is unstable.
    result.sort_by(|a, b| a.field.cmp(&b.field));
    ValidationErrorResponse { errors: result }
}

/// Rejects release years in the future.
pub fn validate_year(year: i32) -> Result<(), ValidationError> {
    if year > Utc::now().year() {
        let mut err = ValidationError::new("year");
        err.message = Some(format!("{year} is not a correct year!").into());
        return Err(err);
    }
    Ok(())
}

/// `me` is reserved by the `/users/me` route.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.eq_ignore_ascii_case("me") {
        let mut err = ValidationError::new("username");
        err.message = Some("the username 'me' is reserved".into());
        return Err(err);
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '@' | '+' | '-' | '_'))
    {
        let mut err = ValidationError::new("username");
        err.message = Some("letters, digits and @/./+/-/_ only".into());
        return Err(err);
    }
    Ok(())
}
