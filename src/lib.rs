use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod permissions;
pub mod repository;
pub mod validation;

// Routers, one per access model.
pub mod routes;
use auth::AuthUser;
use routes::{auth::auth_routes, content::content_routes, users::users_routes};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use confirmation::ConfirmationCodes;
pub use mail::{MailerState, MockMailer, SmtpMailer};
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every `/api/v1` handler, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::send_confirmation_code, handlers::auth::get_token,
        handlers::auth::refresh_token,
        handlers::catalog::list_categories, handlers::catalog::create_category,
        handlers::catalog::get_category, handlers::catalog::update_category,
        handlers::catalog::delete_category,
        handlers::catalog::list_genres, handlers::catalog::create_genre,
        handlers::catalog::get_genre, handlers::catalog::update_genre,
        handlers::catalog::delete_genre,
        handlers::titles::get_titles, handlers::titles::get_title,
        handlers::titles::create_title, handlers::titles::update_title,
        handlers::titles::delete_title,
        handlers::reviews::list_reviews, handlers::reviews::create_review,
        handlers::reviews::get_review, handlers::reviews::update_review,
        handlers::reviews::delete_review,
        handlers::reviews::list_comments, handlers::reviews::add_comment,
        handlers::reviews::get_comment, handlers::reviews::update_comment,
        handlers::reviews::delete_comment,
        handlers::users::list_users, handlers::users::create_user,
        handlers::users::get_user, handlers::users::update_user,
        handlers::users::delete_user, handlers::users::get_me, handlers::users::update_me,
    ),
    components(
        schemas(
            models::Role, models::User, models::CreateUserRequest, models::UpdateUserRequest,
            models::ConfirmationCodeRequest, models::ConfirmationCodeResponse,
            models::TokenRequest, models::TokenPair, models::RefreshRequest, models::AccessToken,
            models::CatalogEntry, models::CreateCatalogEntryRequest,
            models::UpdateCatalogEntryRequest,
            models::Title, models::CreateTitleRequest, models::UpdateTitleRequest,
            models::Review, models::CreateReviewRequest, models::UpdateReviewRequest,
            models::Comment, models::CommentRequest,
            error::FieldError, error::ValidationErrorResponse,
        )
    ),
    tags(
        (name = "yamdb", description = "YaMDb reviews API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Immutable container shared by every request. The database behind `repo` is the only
/// mutable state.
#[derive(Clone)]
pub struct AppState {
    /// Persistence, behind the `Repository` trait.
    pub repo: RepositoryState,
    /// Outgoing mail (SMTP in production, in-memory outbox in tests).
    pub mailer: MailerState,
    pub config: AppConfig,
    /// Confirmation code generator/checker keyed from `config.jwt_secret`.
    pub codes: ConfirmationCodes,
}

impl AppState {
    pub fn new(repo: RepositoryState, mailer: MailerState, config: AppConfig) -> Self {
        let codes = ConfirmationCodes::from_config(&config);
        AppState {
            repo,
            mailer,
            config,
            codes,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// The auth extractors only need the repository and the configuration.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Guards the users router: requests that do not resolve to an `AuthUser` are rejected
/// with 401 before any handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the `/api/v1` routers, the documentation, the health check and the
/// observability layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(auth_routes())
        .merge(content_routes())
        .merge(users_routes().route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        )));

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // GET /health: liveness check.
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying method, URI and the `x-request-id` set by the layer above it.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
