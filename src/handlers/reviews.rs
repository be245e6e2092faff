use axum::{
    Json,
    extract::{Path, State},
    http::{Method, StatusCode},
};

use crate::{
    AppState,
    auth::MaybeAuthUser,
    error::ApiError,
    models::{
        Comment, CommentRequest, CreateReviewRequest, Review, UpdateReviewRequest,
    },
    permissions::{CONTENT_RULES, Requester, authorize},
    validation::Validated,
};

// Write handlers take the body as `Result<Validated<T>, _>` so that permission checks
// and parent lookups answer before payload validation does.

// Parent lookups: a nested resource answers 404 when its parent is missing, or when the
// review in the path does not belong to the title in the path.

async fn require_title(state: &AppState, title_id: i64) -> Result<(), ApiError> {
    match state.repo.get_title(title_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound("title")),
    }
}

async fn require_review(
    state: &AppState,
    title_id: i64,
    review_id: i64,
) -> Result<Review, ApiError> {
    state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))
}

// --- Reviews ---

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title ID")),
    responses(
        (status = 200, description = "Reviews", body = [Review]),
        (status = 404, description = "Unknown title")
    )
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
) -> Result<Json<Vec<Review>>, ApiError> {
    require_title(&state, title_id).await?;
    Ok(Json(state.repo.list_reviews(title_id).await?))
}

/// create_review
///
/// [Authenticated] The author is always the requester. One review per author and title.
#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title ID")),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Created", body = Review),
        (status = 400, description = "Validation error or already reviewed"),
        (status = 401, description = "Anonymous"),
        (status = 404, description = "Unknown title")
    )
)]
pub async fn create_review(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path(title_id): Path<i64>,
    payload: Result<Validated<CreateReviewRequest>, ApiError>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    authorize(CONTENT_RULES, &Requester::new(user.as_ref(), &method), None)?;
    let author = user.ok_or(ApiError::Unauthorized)?;
    require_title(&state, title_id).await?;
    let Validated(payload) = payload?;

    if state
        .repo
        .find_review_by_author(title_id, author.id)
        .await?
        .is_some()
    {
        return Err(ApiError::field(
            "title",
            "unique",
            "you have already reviewed this title",
        ));
    }

    let review = state.repo.create_review(title_id, author.id, payload).await?;
    tracing::info!(title_id, review_id = review.id, author = %author.username, "review created");
    Ok((StatusCode::CREATED, Json(review)))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 200, description = "Found", body = Review),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_review(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<Json<Review>, ApiError> {
    Ok(Json(require_review(&state, title_id, review_id).await?))
}

/// update_review
///
/// [Author / Moderator / Admin]
#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    request_body = UpdateReviewRequest,
    responses(
        (status = 200, description = "Updated", body = Review),
        (status = 403, description = "Not the author, a moderator or an admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_review(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path((title_id, review_id)): Path<(i64, i64)>,
    payload: Result<Validated<UpdateReviewRequest>, ApiError>,
) -> Result<Json<Review>, ApiError> {
    let requester = Requester::new(user.as_ref(), &method);
    authorize(CONTENT_RULES, &requester, None)?;
    let review = require_review(&state, title_id, review_id).await?;
    authorize(CONTENT_RULES, &requester, Some(&review))?;
    let Validated(payload) = payload?;

    state
        .repo
        .update_review(review.id, payload)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("review"))
}

/// delete_review
///
/// [Author / Moderator / Admin] Cascades to the review's comments.
#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author, a moderator or an admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_review(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let requester = Requester::new(user.as_ref(), &method);
    authorize(CONTENT_RULES, &requester, None)?;
    let review = require_review(&state, title_id, review_id).await?;
    authorize(CONTENT_RULES, &requester, Some(&review))?;

    if state.repo.delete_review(review.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("review"))
    }
}

// --- Comments ---

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 200, description = "Comments", body = [Comment]),
        (status = 404, description = "Unknown title or review")
    )
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let review = require_review(&state, title_id, review_id).await?;
    Ok(Json(state.repo.list_comments(review.id).await?))
}

/// add_comment
///
/// [Authenticated] The author is always the requester.
#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment Added", body = Comment),
        (status = 401, description = "Anonymous"),
        (status = 404, description = "Unknown title or review")
    )
)]
pub async fn add_comment(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path((title_id, review_id)): Path<(i64, i64)>,
    payload: Result<Validated<CommentRequest>, ApiError>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    authorize(CONTENT_RULES, &Requester::new(user.as_ref(), &method), None)?;
    let author = user.ok_or(ApiError::Unauthorized)?;
    let review = require_review(&state, title_id, review_id).await?;
    let Validated(payload) = payload?;

    let comment = state
        .repo
        .create_comment(review.id, author.id, payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn require_comment(
    state: &AppState,
    title_id: i64,
    review_id: i64,
    comment_id: i64,
) -> Result<Comment, ApiError> {
    let review = require_review(state, title_id, review_id).await?;
    state
        .repo
        .get_comment(review.id, comment_id)
        .await?
        .ok_or(ApiError::NotFound("comment"))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses(
        (status = 200, description = "Found", body = Comment),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_comment(
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<Json<Comment>, ApiError> {
    Ok(Json(
        require_comment(&state, title_id, review_id, comment_id).await?,
    ))
}

#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Updated", body = Comment),
        (status = 403, description = "Not the author, a moderator or an admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_comment(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    payload: Result<Validated<CommentRequest>, ApiError>,
) -> Result<Json<Comment>, ApiError> {
    let requester = Requester::new(user.as_ref(), &method);
    authorize(CONTENT_RULES, &requester, None)?;
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    authorize(CONTENT_RULES, &requester, Some(&comment))?;
    let Validated(payload) = payload?;

    state
        .repo
        .update_comment(comment.id, payload.text)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("comment"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author, a moderator or an admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    method: Method,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let requester = Requester::new(user.as_ref(), &method);
    authorize(CONTENT_RULES, &requester, None)?;
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    authorize(CONTENT_RULES, &requester, Some(&comment))?;

    if state.repo.delete_comment(comment.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("comment"))
    }
}
