use axum::{
    Json,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
};

use crate::{
    AppState,
    auth::MaybeAuthUser,
    error::ApiError,
    models::{
        Catalog, CreateTitleRequest, NewTitle, Title, TitleChanges, TitleFilter,
        UpdateTitleRequest,
    },
    permissions::{AdminOrReadOnly, Requester, authorize},
    repository::Repository,
    validation::Validated,
};

// --- Slug resolution ---

async fn resolve_category(repo: &dyn Repository, slug: &str) -> Result<i64, ApiError> {
    repo.get_entry_id(Catalog::Categories, slug)
        .await?
        .ok_or_else(|| {
            ApiError::field(
                "category",
                "does_not_exist",
                format!("category '{slug}' does not exist"),
            )
        })
}

async fn resolve_genres(repo: &dyn Repository, slugs: &[String]) -> Result<Vec<i64>, ApiError> {
    let mut ids = Vec::with_capacity(slugs.len());
    for slug in slugs {
        let id = repo
            .get_entry_id(Catalog::Genres, slug)
            .await?
            .ok_or_else(|| {
                ApiError::field(
                    "genre",
                    "does_not_exist",
                    format!("genre '{slug}' does not exist"),
                )
            })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// get_titles
///
/// [Public Route] Lists titles with their average rating (`null` when unreviewed).
/// Filters: `category` and `genre` by slug, `name` by substring, `year` exact.
#[utoipa::path(
    get,
    path = "/api/v1/titles",
    params(TitleFilter),
    responses((status = 200, description = "Titles", body = [Title]))
)]
pub async fn get_titles(
    State(state): State<AppState>,
    Query(filter): Query<TitleFilter>,
) -> Result<Json<Vec<Title>>, ApiError> {
    Ok(Json(state.repo.list_titles(filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{id}",
    params(("id" = i64, Path, description = "Title ID")),
    responses(
        (status = 200, description = "Found", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_title(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Title>, ApiError> {
    state
        .repo
        .get_title(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("title"))
}

/// create_title
///
/// [Admin] Category and genres are given by slug. Unknown slugs and future years are
/// field-level 400s.
#[utoipa::path(
    post,
    path = "/api/v1/titles",
    request_body = CreateTitleRequest,
    responses(
        (status = 201, description = "Created", body = Title),
        (status = 400, description = "Validation error"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_title(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    payload: Result<Validated<CreateTitleRequest>, ApiError>,
) -> Result<(StatusCode, Json<Title>), ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    let Validated(payload) = payload?;

    let category_id = match payload.category.as_deref() {
        Some(slug) => Some(resolve_category(state.repo.as_ref(), slug).await?),
        None => None,
    };
    let genre_ids = resolve_genres(state.repo.as_ref(), &payload.genre).await?;

    let title = state
        .repo
        .create_title(NewTitle {
            name: payload.name,
            year: payload.year,
            description: payload.description,
            category_id,
            genre_ids,
        })
        .await?;
    tracing::info!(title_id = title.id, "title created");
    Ok((StatusCode::CREATED, Json(title)))
}

/// update_title
///
/// [Admin] Partial update; a provided `genre` list replaces the current genres and
/// `"category": null` detaches the category.
#[utoipa::path(
    patch,
    path = "/api/v1/titles/{id}",
    params(("id" = i64, Path, description = "Title ID")),
    request_body = UpdateTitleRequest,
    responses(
        (status = 200, description = "Updated", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_title(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(id): Path<i64>,
    payload: Result<Validated<UpdateTitleRequest>, ApiError>,
) -> Result<Json<Title>, ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    let Validated(payload) = payload?;

    let category_id = match payload.category {
        Some(Some(slug)) => Some(Some(resolve_category(state.repo.as_ref(), &slug).await?)),
        Some(None) => Some(None),
        None => None,
    };
    let genre_ids = match payload.genre.as_deref() {
        Some(slugs) => Some(resolve_genres(state.repo.as_ref(), slugs).await?),
        None => None,
    };

    let changes = TitleChanges {
        name: payload.name,
        year: payload.year,
        description: payload.description,
        category_id,
        genre_ids,
    };
    state
        .repo
        .update_title(id, changes)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("title"))
}

/// delete_title
///
/// [Admin] Cascades to the title's reviews and their comments.
#[utoipa::path(
    delete,
    path = "/api/v1/titles/{id}",
    params(("id" = i64, Path, description = "Title ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_title(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    if state.repo.delete_title(id).await? {
        tracing::info!(title_id = id, "title deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("title"))
    }
}
