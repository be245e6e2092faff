use crate::{AppState, handlers};
use axum::{Router, routing::get};

use handlers::{catalog, reviews, titles};

/// Content Router Module
///
/// Every route here answers GET for anonymous clients. Writes are checked inside the
/// handlers, where the target object is known:
/// - categories, genres, titles: admin only
/// - reviews, comments: any account may create; the author, moderators and admins may
///   edit or delete
pub fn content_routes() -> Router<AppState> {
    Router::new()
        // --- Catalog ---
        .route(
            "/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route(
            "/categories/{slug}",
            get(catalog::get_category)
                .patch(catalog::update_category)
                .delete(catalog::delete_category),
        )
        .route(
            "/genres",
            get(catalog::list_genres).post(catalog::create_genre),
        )
        .route(
            "/genres/{slug}",
            get(catalog::get_genre)
                .patch(catalog::update_genre)
                .delete(catalog::delete_genre),
        )
        // --- Titles ---
        // GET /titles?category=&genre=&name=&year=
        .route("/titles", get(titles::get_titles).post(titles::create_title))
        .route(
            "/titles/{id}",
            get(titles::get_title)
                .patch(titles::update_title)
                .delete(titles::delete_title),
        )
        // --- Reviews ---
        // A second review by the same author on the same title is rejected.
        .route(
            "/titles/{title_id}/reviews",
            get(reviews::list_reviews).post(reviews::create_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(reviews::get_review)
                .patch(reviews::update_review)
                .delete(reviews::delete_review),
        )
        // --- Comments ---
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(reviews::list_comments).post(reviews::add_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(reviews::get_comment)
                .patch(reviews::update_comment)
                .delete(reviews::delete_comment),
        )
}
