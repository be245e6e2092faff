//! Role-based access rules.
//!
//! Each rule answers two questions, mirroring how requests are processed:
//! - `has_permission`: may this requester call the endpoint at all?
//! - `has_object_permission`: may they act on this particular object?
//!
//! [`authorize`] runs a set of rules and turns a denial into 401 (anonymous) or 403.

use axum::http::Method;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError};

/// GET, HEAD and OPTIONS never modify state and are open to every caller.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Requester
///
/// What a rule gets to see about the incoming request.
#[derive(Debug, Clone, Copy)]
pub struct Requester<'a> {
    pub user: Option<&'a AuthUser>,
    pub method: &'a Method,
}

impl<'a> Requester<'a> {
    pub fn new(user: Option<&'a AuthUser>, method: &'a Method) -> Self {
        Self { user, method }
    }

    fn is_safe(&self) -> bool {
        is_safe_method(self.method)
    }
}

/// Authored
///
/// Objects carrying an author back-reference (reviews, comments).
pub trait Authored {
    fn author_id(&self) -> Uuid;
}

impl Authored for crate::models::Review {
    fn author_id(&self) -> Uuid {
        self.author_id
    }
}

impl Authored for crate::models::Comment {
    fn author_id(&self) -> Uuid {
        self.author_id
    }
}

pub trait Permission: Send + Sync {
    fn has_permission(&self, _req: &Requester<'_>) -> bool {
        true
    }

    fn has_object_permission(&self, _req: &Requester<'_>, _object: &dyn Authored) -> bool {
        true
    }

    /// `allow(request, object = None)`.
    fn allow(&self, req: &Requester<'_>, object: Option<&dyn Authored>) -> bool {
        self.has_permission(req) && object.is_none_or(|obj| self.has_object_permission(req, obj))
    }
}

/// Authenticated admins (or superusers) only, for every method.
pub struct AdminOnly;

impl Permission for AdminOnly {
    fn has_permission(&self, req: &Requester<'_>) -> bool {
        req.user.is_some_and(AuthUser::is_admin)
    }
}

/// Anyone may read; writing requires admin.
pub struct AdminOrReadOnly;

impl Permission for AdminOrReadOnly {
    fn has_permission(&self, req: &Requester<'_>) -> bool {
        req.is_safe() || req.user.is_some_and(AuthUser::is_admin)
    }
}

/// Any authenticated user.
pub struct IsAuthenticated;

impl Permission for IsAuthenticated {
    fn has_permission(&self, req: &Requester<'_>) -> bool {
        req.user.is_some()
    }
}

/// Anyone may read; creating requires an account.
pub struct IsAuthenticatedOrReadOnly;

impl Permission for IsAuthenticatedOrReadOnly {
    fn has_permission(&self, req: &Requester<'_>) -> bool {
        req.is_safe() || req.user.is_some()
    }
}

/// Anyone may read; changing an object is reserved to its author, moderators and admins.
pub struct AuthorAdminModeratorOrReadOnly;

impl Permission for AuthorAdminModeratorOrReadOnly {
    fn has_object_permission(&self, req: &Requester<'_>, object: &dyn Authored) -> bool {
        if req.is_safe() {
            return true;
        }
        req.user.is_some_and(|user| {
            user.id == object.author_id() || user.is_admin() || user.is_moderator()
        })
    }
}

/// Rule set for reviews and comments.
pub const CONTENT_RULES: &[&dyn Permission] =
    &[&AuthorAdminModeratorOrReadOnly, &IsAuthenticatedOrReadOnly];

/// authorize
///
/// Every rule must allow the request. A denied anonymous requester gets 401 (they may
/// retry with credentials); a denied authenticated one gets 403.
pub fn authorize(
    rules: &[&dyn Permission],
    req: &Requester<'_>,
    object: Option<&dyn Authored>,
) -> Result<(), ApiError> {
    if rules.iter().all(|rule| rule.allow(req, object)) {
        return Ok(());
    }
    tracing::debug!(method = %req.method, user = ?req.user.map(|u| &u.username), "permission denied");
    match req.user {
        None => Err(ApiError::Unauthorized),
        Some(_) => Err(ApiError::Forbidden),
    }
}
