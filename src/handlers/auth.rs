use axum::{Json, extract::State};

use crate::{
    AppState,
    auth::{TokenKind, decode_token, issue_access_token},
    confirmation,
    error::ApiError,
    models::{
        AccessToken, ConfirmationCodeRequest, ConfirmationCodeResponse, RefreshRequest,
        TokenPair, TokenRequest,
    },
    validation::Validated,
};

/// send_confirmation_code
///
/// [Public Route] Registers the email (inactive account) on first use and mails a
/// confirmation code. Repeating the call re-sends a fresh code for the same account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/email",
    request_body = ConfirmationCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = ConfirmationCodeResponse),
        (status = 400, description = "Invalid email or username clash"),
        (status = 500, description = "Mail delivery failed")
    )
)]
pub async fn send_confirmation_code(
    State(state): State<AppState>,
    Validated(payload): Validated<ConfirmationCodeRequest>,
) -> Result<Json<ConfirmationCodeResponse>, ApiError> {
    let user = confirmation::request_code(
        state.repo.as_ref(),
        state.mailer.as_ref(),
        &state.codes,
        &payload.email,
    )
    .await?;
    Ok(Json(ConfirmationCodeResponse { email: user.email }))
}

/// get_token
///
/// [Public Route] Exchanges email + confirmation code for an access/refresh pair and
/// activates the account. Nothing is issued for a wrong code.
#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Tokens", body = TokenPair),
        (status = 400, description = "Invalid email or confirmation code")
    )
)]
pub async fn get_token(
    State(state): State<AppState>,
    Validated(payload): Validated<TokenRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = confirmation::verify_code(
        state.repo.as_ref(),
        &state.codes,
        &state.config,
        &payload.email,
        &payload.confirmation_code,
    )
    .await?;
    Ok(Json(pair))
}

/// refresh_token
///
/// [Public Route] Issues a new access token from a refresh token whose user still exists
/// and is active.
#[utoipa::path(
    post,
    path = "/api/v1/auth/token/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessToken),
        (status = 401, description = "Invalid refresh token")
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Validated(payload): Validated<RefreshRequest>,
) -> Result<Json<AccessToken>, ApiError> {
    let claims = decode_token(&state.config, &payload.refresh, TokenKind::Refresh)?;
    let user = state
        .repo
        .get_user(claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(AccessToken {
        access: issue_access_token(&state.config, user.id)?,
    }))
}
