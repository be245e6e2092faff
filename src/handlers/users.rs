use axum::{
    Json,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
};

use crate::{
    AppState,
    auth::AuthUser,
    error::ApiError,
    models::{CreateUserRequest, SearchQuery, UpdateUserRequest, User},
    permissions::{AdminOnly, IsAuthenticated, Requester, authorize},
    validation::Validated,
};

async fn find_by_username(state: &AppState, username: &str) -> Result<User, ApiError> {
    state
        .repo
        .get_user_by_username(username)
        .await?
        .ok_or(ApiError::NotFound("user"))
}

/// list_users
///
/// [Admin] `?search=` matches a substring of the username.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(SearchQuery),
    responses(
        (status = 200, description = "Users", body = [User]),
        (status = 401, description = "Anonymous"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    authorize(&[&AdminOnly], &Requester::new(Some(&user), &method), None)?;
    Ok(Json(state.repo.list_users(query.search).await?))
}

/// create_user
///
/// [Admin] Accounts created here are active immediately; the user can still go through
/// the confirmation-code flow to obtain tokens.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = User),
        (status = 400, description = "Invalid, duplicate, or unknown role"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    payload: Result<Validated<CreateUserRequest>, ApiError>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    authorize(&[&AdminOnly], &Requester::new(Some(&user), &method), None)?;
    let Validated(payload) = payload?;
    let created = state.repo.create_user(payload).await?;
    tracing::info!(username = %created.username, role = %created.role, by = %user.username, "user created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Found", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    Path(username): Path<String>,
) -> Result<Json<User>, ApiError> {
    authorize(&[&AdminOnly], &Requester::new(Some(&user), &method), None)?;
    Ok(Json(find_by_username(&state, &username).await?))
}

/// update_user
///
/// [Admin] Partial update, including `role`.
#[utoipa::path(
    patch,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    Path(username): Path<String>,
    payload: Result<Validated<UpdateUserRequest>, ApiError>,
) -> Result<Json<User>, ApiError> {
    authorize(&[&AdminOnly], &Requester::new(Some(&user), &method), None)?;
    let target = find_by_username(&state, &username).await?;
    let Validated(payload) = payload?;
    state
        .repo
        .update_user(target.id, payload)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("user"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&[&AdminOnly], &Requester::new(Some(&user), &method), None)?;
    let target = find_by_username(&state, &username).await?;
    if state.repo.delete_user(target.id).await? {
        tracing::info!(%username, by = %user.username, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("user"))
    }
}

/// get_me
///
/// [Authenticated] The requester's own profile.
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Own profile", body = User),
        (status = 401, description = "Anonymous")
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
) -> Result<Json<User>, ApiError> {
    authorize(&[&IsAuthenticated], &Requester::new(Some(&user), &method), None)?;
    state
        .repo
        .get_user(user.id)
        .await?
        .map(Json)
        .ok_or(ApiError::Unauthorized)
}

/// update_me
///
/// [Authenticated] Edits the requester's own profile. `role` is read-only here and is
/// discarded if present.
#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 401, description = "Anonymous")
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    method: Method,
    payload: Result<Validated<UpdateUserRequest>, ApiError>,
) -> Result<Json<User>, ApiError> {
    authorize(&[&IsAuthenticated], &Requester::new(Some(&user), &method), None)?;
    let Validated(payload) = payload?;
    let changes = UpdateUserRequest {
        role: None,
        ..payload
    };
    state
        .repo
        .update_user(user.id, changes)
        .await?
        .map(Json)
        .ok_or(ApiError::Unauthorized)
}
