use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Auth Router Module
///
/// The signup/login flow has no password: a code is mailed to the address, then traded
/// for a token pair.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/email
        // Registers the address as an inactive account on first use and mails a code.
        .route("/auth/email", post(handlers::auth::send_confirmation_code))
        // POST /auth/token
        // Email + code in, access/refresh pair out. Activates the account.
        .route("/auth/token", post(handlers::auth::get_token))
        // POST /auth/token/refresh
        .route("/auth/token/refresh", post(handlers::auth::refresh_token))
}
