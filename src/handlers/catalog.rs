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
        Catalog, CatalogEntry, CreateCatalogEntryRequest, SearchQuery, UpdateCatalogEntryRequest,
    },
    permissions::{AdminOrReadOnly, Requester, authorize},
    validation::Validated,
};

// Categories and genres behave identically; the public handlers below are thin,
// per-table entry points into these shared bodies.

async fn list(
    state: &AppState,
    catalog: Catalog,
    query: SearchQuery,
) -> Result<Json<Vec<CatalogEntry>>, ApiError> {
    Ok(Json(state.repo.list_entries(catalog, query.search).await?))
}

async fn create(
    state: &AppState,
    catalog: Catalog,
    user: MaybeAuthUser,
    method: Method,
    payload: Result<Validated<CreateCatalogEntryRequest>, ApiError>,
) -> Result<(StatusCode, Json<CatalogEntry>), ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    let Validated(payload) = payload?;
    let entry = state.repo.create_entry(catalog, payload).await?;
    tracing::info!(table = catalog.table(), slug = %entry.slug, "catalog entry created");
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn retrieve(
    state: &AppState,
    catalog: Catalog,
    slug: &str,
) -> Result<Json<CatalogEntry>, ApiError> {
    state
        .repo
        .get_entry(catalog, slug)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(catalog.entity()))
}

async fn update(
    state: &AppState,
    catalog: Catalog,
    user: MaybeAuthUser,
    method: Method,
    slug: &str,
    payload: Result<Validated<UpdateCatalogEntryRequest>, ApiError>,
) -> Result<Json<CatalogEntry>, ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    let Validated(payload) = payload?;
    state
        .repo
        .update_entry(catalog, slug, payload)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(catalog.entity()))
}

async fn delete(
    state: &AppState,
    catalog: Catalog,
    user: MaybeAuthUser,
    method: Method,
    slug: &str,
) -> Result<StatusCode, ApiError> {
    authorize(&[&AdminOrReadOnly], &Requester::new(user.0.as_ref(), &method), None)?;
    if state.repo.delete_entry(catalog, slug).await? {
        tracing::info!(table = catalog.table(), %slug, "catalog entry deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(catalog.entity()))
    }
}

// --- Categories ---

/// list_categories
///
/// [Public Route] `?search=` matches a case-insensitive substring of the name.
#[utoipa::path(
    get,
    path = "/api/v1/categories",
    params(SearchQuery),
    responses((status = 200, description = "Categories", body = [CatalogEntry]))
)]
pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<CatalogEntry>>, ApiError> {
    list(&state, Catalog::Categories, query).await
}

/// create_category
///
/// [Admin] Slugs are unique; a duplicate is a 400.
#[utoipa::path(
    post,
    path = "/api/v1/categories",
    request_body = CreateCatalogEntryRequest,
    responses(
        (status = 201, description = "Created", body = CatalogEntry),
        (status = 400, description = "Invalid or duplicate"),
        (status = 401, description = "Anonymous"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_category(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    payload: Result<Validated<CreateCatalogEntryRequest>, ApiError>,
) -> Result<(StatusCode, Json<CatalogEntry>), ApiError> {
    create(&state, Catalog::Categories, user, method, payload).await
}

#[utoipa::path(
    get,
    path = "/api/v1/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses(
        (status = 200, description = "Found", body = CatalogEntry),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CatalogEntry>, ApiError> {
    retrieve(&state, Catalog::Categories, &slug).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    request_body = UpdateCatalogEntryRequest,
    responses((status = 200, description = "Updated", body = CatalogEntry))
)]
pub async fn update_category(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(slug): Path<String>,
    payload: Result<Validated<UpdateCatalogEntryRequest>, ApiError>,
) -> Result<Json<CatalogEntry>, ApiError> {
    update(&state, Catalog::Categories, user, method, &slug, payload).await
}

/// delete_category
///
/// [Admin] Titles of the deleted category keep existing with no category.
#[utoipa::path(
    delete,
    path = "/api/v1/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_category(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    delete(&state, Catalog::Categories, user, method, &slug).await
}

// --- Genres ---

#[utoipa::path(
    get,
    path = "/api/v1/genres",
    params(SearchQuery),
    responses((status = 200, description = "Genres", body = [CatalogEntry]))
)]
pub async fn list_genres(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<CatalogEntry>>, ApiError> {
    list(&state, Catalog::Genres, query).await
}

#[utoipa::path(
    post,
    path = "/api/v1/genres",
    request_body = CreateCatalogEntryRequest,
    responses(
        (status = 201, description = "Created", body = CatalogEntry),
        (status = 400, description = "Invalid or duplicate"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_genre(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    payload: Result<Validated<CreateCatalogEntryRequest>, ApiError>,
) -> Result<(StatusCode, Json<CatalogEntry>), ApiError> {
    create(&state, Catalog::Genres, user, method, payload).await
}

#[utoipa::path(
    get,
    path = "/api/v1/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses(
        (status = 200, description = "Found", body = CatalogEntry),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_genre(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CatalogEntry>, ApiError> {
    retrieve(&state, Catalog::Genres, &slug).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    request_body = UpdateCatalogEntryRequest,
    responses((status = 200, description = "Updated", body = CatalogEntry))
)]
pub async fn update_genre(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(slug): Path<String>,
    payload: Result<Validated<UpdateCatalogEntryRequest>, ApiError>,
) -> Result<Json<CatalogEntry>, ApiError> {
    update(&state, Catalog::Genres, user, method, &slug, payload).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_genre(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    method: Method,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    delete(&state, Catalog::Genres, user, method, &slug).await
}
