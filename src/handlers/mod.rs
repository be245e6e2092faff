//! HTTP handlers, one module per resource.
//!
//! Handlers resolve the requester with [`crate::auth::MaybeAuthUser`] (public-read resources)
//! or [`crate::auth::AuthUser`] (account resources), check the matching rules from
//! [`crate::permissions`], then delegate to the repository.

pub mod auth;
pub mod catalog;
pub mod reviews;
pub mod titles;
pub mod users;
