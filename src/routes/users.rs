use crate::{AppState, handlers::users};
use axum::{Router, routing::get};

/// Users Router Module
///
/// Relies on the `AuthUser` middleware layered on top of it in `create_router`, so every
/// handler here sees an authenticated requester. `/users/me` is open to any account; the
/// rest is admin only, checked in the handlers.
pub fn users_routes() -> Router<AppState> {
    Router::new()
        // GET/PATCH /users/me
        // The static segment wins over `{username}`, so `me` is a reserved username.
        .route("/users/me", get(users::get_me).patch(users::update_me))
        // GET /users?search=  |  POST /users
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{username}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
}
