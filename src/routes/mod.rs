/// Router Module Index
///
/// One router per access model. Paths are relative to the `/api/v1` prefix applied in
/// [`crate::create_router`].

/// Confirmation-code and token endpoints. Always anonymous.
pub mod auth;

/// Categories, genres, titles, reviews and comments.
/// Public for safe methods; handlers apply the per-resource write rules.
pub mod content;

/// Account management. Mounted behind the `AuthUser` middleware.
pub mod users;
