use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::ApiError,
    models::{Role, TokenPair, User},
    repository::RepositoryState,
};

/// TokenKind
///
/// Distinguishes the short-lived access token from the refresh token. Only access tokens
/// authenticate requests; refresh tokens are only accepted by `/auth/token/refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims
///
/// Payload of every token this service signs (HS256, `AppConfig::jwt_secret`).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    /// Unique token id, so two tokens minted in the same second still differ.
    pub jti: Uuid,
    pub token_type: TokenKind,
}

fn sign(config: &AppConfig, user_id: Uuid, kind: TokenKind) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let ttl = match kind {
        TokenKind::Access => config.access_token_ttl_secs,
        TokenKind::Refresh => config.refresh_token_ttl_secs,
    };
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + ttl) as usize,
        jti: Uuid::new_v4(),
        token_type: kind,
    };
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    Ok(encode(&Header::default(), &claims, &key)?)
}

/// Mints an access/refresh pair for `user_id`.
pub fn issue_token_pair(config: &AppConfig, user_id: Uuid) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access: sign(config, user_id, TokenKind::Access)?,
        refresh: sign(config, user_id, TokenKind::Refresh)?,
    })
}

pub fn issue_access_token(config: &AppConfig, user_id: Uuid) -> Result<String, ApiError> {
    sign(config, user_id, TokenKind::Access)
}

/// decode_token
///
/// Verifies signature and expiry, then the token kind. Any failure is `Unauthorized`;
/// the precise reason is only logged.
pub fn decode_token(config: &AppConfig, token: &str, expected: TokenKind) -> Result<Claims, ApiError> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(kind = ?e.kind(), "token rejected");
        ApiError::Unauthorized
    })?;

    if data.claims.token_type != expected {
        tracing::debug!(got = ?data.claims.token_type, "wrong token kind");
        return Err(ApiError::Unauthorized);
    }
    Ok(data.claims)
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub is_superuser: bool,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_superuser
    }

    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        AuthUser {
            id: user.id,
            username: user.username,
            role: user.role,
            is_superuser: user.is_superuser,
        }
    }
}

/// resolve_user
///
/// Shared by [`AuthUser`] and [`MaybeAuthUser`]:
/// - `Ok(None)` when the request carries no credentials at all.
/// - `Err(Unauthorized)` when it carries bad ones.
///
/// Steps:
/// 1. Local bypass: in `Env::Local`, an `x-user-id` header naming an existing active user
///    is accepted.
/// 2. Bearer token: `Authorization: Bearer <access token>`, verified and decoded.
/// 3. DB lookup: the token's user must still exist and be active.
async fn resolve_user(
    parts: &Parts,
    repo: &RepositoryState,
    config: &AppConfig,
) -> Result<Option<AuthUser>, ApiError> {
    if config.env == Env::Local {
        if let Some(user_id) = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|id_str| Uuid::parse_str(id_str).ok())
        {
            if let Some(user) = repo.get_user(user_id).await?.filter(|u| u.is_active) {
                return Ok(Some(user.into()));
            }
        }
    }

    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode_token(config, token, TokenKind::Access)?;

    // Rejects tokens of users deleted or deactivated after issuance.
    let user = repo
        .get_user(claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::Unauthorized)?;

    Ok(Some(user.into()))
}

/// AuthUser Extractor Implementation
///
/// Usable as a handler argument wherever authentication is mandatory.
/// Rejection: 401 when credentials are missing or invalid.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        resolve_user(parts, &repo, &config)
            .await?
            .ok_or(ApiError::Unauthorized)
    }
}

/// MaybeAuthUser
///
/// Optional identity for endpoints that are public for safe methods. Anonymous requests
/// resolve to `None`; a request presenting invalid credentials is still rejected with 401.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        Ok(MaybeAuthUser(resolve_user(parts, &repo, &config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_contains_one_token_of_each_kind() {
        let config = AppConfig::default();
        let user_id = Uuid::new_v4();
        let pair = issue_token_pair(&config, user_id).unwrap();

        let access = decode_token(&config, &pair.access, TokenKind::Access).unwrap();
        assert_eq!(access.sub, user_id);
        let refresh = decode_token(&config, &pair.refresh, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.sub, user_id);
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = AppConfig::default();
        let pair = issue_token_pair(&config, Uuid::new_v4()).unwrap();
        assert!(matches!(
            decode_token(&config, &pair.refresh, TokenKind::Access),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let config = AppConfig::default();
        let other = AppConfig {
            jwt_secret: "another-secret".to_string(),
            ..AppConfig::default()
        };
        let token = issue_access_token(&other, Uuid::new_v4()).unwrap();
        assert!(decode_token(&config, &token, TokenKind::Access).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AppConfig {
            access_token_ttl_secs: -3600,
            ..AppConfig::default()
        };
        let token = issue_access_token(&config, Uuid::new_v4()).unwrap();
        assert!(decode_token(&config, &token, TokenKind::Access).is_err());
    }
}
