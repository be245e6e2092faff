#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use serde_json::Value;
use sqlx::error::{DatabaseError, ErrorKind};
use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt,
    sync::{Arc, Mutex},
};
use tower::util::ServiceExt;
use uuid::Uuid;
use yamdb_api::{
    AppConfig, AppState, MockMailer,
    auth::issue_token_pair,
    mail::MailerState,
    models::{
        Catalog, CatalogEntry, Comment, CreateCatalogEntryRequest, CreateReviewRequest,
        CreateUserRequest, NewTitle, Review, Role, Title, TitleChanges, TitleFilter,
        UpdateCatalogEntryRequest, UpdateReviewRequest, UpdateUserRequest, User,
    },
    repository::{RepoResult, Repository, RepositoryState},
};

// --- UNIQUE VIOLATION ---

// Lets the in-memory store fail the way Postgres does on a unique constraint.
#[derive(Debug)]
struct UniqueViolation(&'static str);

impl fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duplicate key value violates unique constraint \"{}\"", self.0)
    }
}

impl StdError for UniqueViolation {}

impl DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint"
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("23505"))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn constraint(&self) -> Option<&str> {
        Some(self.0)
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::UniqueViolation
    }
}

fn unique(constraint: &'static str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(UniqueViolation(constraint)))
}

// --- IN-MEMORY REPOSITORY ---

struct StoredEntry {
    id: i64,
    entry: CatalogEntry,
}

struct StoredTitle {
    id: i64,
    name: String,
    year: i32,
    description: String,
    category_id: Option<i64>,
    genre_ids: Vec<i64>,
}

#[derive(Default)]
struct Store {
    next_id: i64,
    users: Vec<User>,
    categories: Vec<StoredEntry>,
    genres: Vec<StoredEntry>,
    titles: Vec<StoredTitle>,
    reviews: Vec<Review>,
    comments: Vec<Comment>,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn entries(&self, catalog: Catalog) -> &Vec<StoredEntry> {
        match catalog {
            Catalog::Categories => &self.categories,
            Catalog::Genres => &self.genres,
        }
    }

    fn entries_mut(&mut self, catalog: Catalog) -> &mut Vec<StoredEntry> {
        match catalog {
            Catalog::Categories => &mut self.categories,
            Catalog::Genres => &mut self.genres,
        }
    }

    fn username(&self, id: Uuid) -> String {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn title(&self, stored: &StoredTitle) -> Title {
        let scores: Vec<f64> = self
            .reviews
            .iter()
            .filter(|r| r.title_id == stored.id)
            .map(|r| f64::from(r.score))
            .collect();
        let rating = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        let category = stored.category_id.and_then(|id| {
            self.categories
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.entry.clone())
        });
        let mut genre: Vec<CatalogEntry> = self
            .genres
            .iter()
            .filter(|g| stored.genre_ids.contains(&g.id))
            .map(|g| g.entry.clone())
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name));

        Title {
            id: stored.id,
            name: stored.name.clone(),
            year: stored.year,
            rating,
            description: stored.description.clone(),
            genre,
            category,
        }
    }

    fn drop_reviews(&mut self, doomed: impl Fn(&Review) -> bool) {
        let ids: Vec<i64> = self
            .reviews
            .iter()
            .filter(|r| doomed(r))
            .map(|r| r.id)
            .collect();
        self.reviews.retain(|r| !ids.contains(&r.id));
        self.comments.retain(|c| !ids.contains(&c.review_id));
    }
}

/// InMemoryRepository
///
/// Mirrors the Postgres schema: unique usernames, emails, slugs and one review per
/// author and title, plus the same cascades.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an active account directly, bypassing the confirmation flow.
    pub fn insert_user(&self, username: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            role,
            is_active: true,
            ..User::default()
        };
        self.store.lock().unwrap().users.push(user.clone());
        user
    }

    pub fn insert_superuser(&self, username: &str) -> User {
        let mut user = self.insert_user(username, Role::User);
        let mut store = self.store.lock().unwrap();
        if let Some(stored) = store.users.iter_mut().find(|u| u.id == user.id) {
            stored.is_superuser = true;
        }
        user.is_superuser = true;
        user
    }

    pub fn insert_entry(&self, catalog: Catalog, name: &str, slug: &str) {
        let mut store = self.store.lock().unwrap();
        let id = store.next_id();
        store.entries_mut(catalog).push(StoredEntry {
            id,
            entry: CatalogEntry {
                name: name.to_string(),
                slug: slug.to_string(),
            },
        });
    }

    pub fn user_count(&self) -> usize {
        self.store.lock().unwrap().users.len()
    }

    pub fn comment_count(&self) -> usize {
        self.store.lock().unwrap().comments.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_or_create_pending_user(&self, email: &str, username: &str) -> RepoResult<User> {
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store.users.iter().find(|u| u.email == email) {
            return Ok(existing.clone());
        }
        if store.users.iter().any(|u| u.username == username) {
            return Err(unique("users_username_key"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            is_active: false,
            ..User::default()
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn record_login(&self, id: Uuid) -> RepoResult<Option<User>> {
        let mut store = self.store.lock().unwrap();
        Ok(store.users.iter_mut().find(|u| u.id == id).map(|u| {
            u.is_active = true;
            u.last_login = Some(Utc::now());
            u.clone()
        }))
    }

    async fn list_users(&self, search: Option<String>) -> RepoResult<Vec<User>> {
        let store = self.store.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut users: Vec<User> = store
            .users
            .iter()
            .filter(|u| {
                needle
                    .as_deref()
                    .is_none_or(|n| u.username.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_user(&self, req: CreateUserRequest) -> RepoResult<User> {
        let mut store = self.store.lock().unwrap();
        if store.users.iter().any(|u| u.username == req.username) {
            return Err(unique("users_username_key"));
        }
        if store.users.iter().any(|u| u.email == req.email) {
            return Err(unique("users_email_key"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: req.username,
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            bio: req.bio,
            role: req.role,
            is_active: true,
            ..User::default()
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, req: UpdateUserRequest) -> RepoResult<Option<User>> {
        let mut store = self.store.lock().unwrap();
        if let Some(username) = &req.username {
            if store.users.iter().any(|u| u.id != id && &u.username == username) {
                return Err(unique("users_username_key"));
            }
        }
        if let Some(email) = &req.email {
            if store.users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(unique("users_email_key"));
            }
        }
        Ok(store.users.iter_mut().find(|u| u.id == id).map(|u| {
            if let Some(v) = req.username {
                u.username = v;
            }
            if let Some(v) = req.email {
                u.email = v;
            }
            if let Some(v) = req.first_name {
                u.first_name = v;
            }
            if let Some(v) = req.last_name {
                u.last_name = v;
            }
            if let Some(v) = req.bio {
                u.bio = v;
            }
            if let Some(v) = req.role {
                u.role = v;
            }
            u.clone()
        }))
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.store.lock().unwrap();
        let before = store.users.len();
        store.users.retain(|u| u.id != id);
        if store.users.len() == before {
            return Ok(false);
        }
        store.drop_reviews(|r| r.author_id == id);
        store.comments.retain(|c| c.author_id != id);
        Ok(true)
    }

    async fn list_entries(
        &self,
        catalog: Catalog,
        search: Option<String>,
    ) -> RepoResult<Vec<CatalogEntry>> {
        let store = self.store.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut entries: Vec<CatalogEntry> = store
            .entries(catalog)
            .iter()
            .filter(|e| {
                needle
                    .as_deref()
                    .is_none_or(|n| e.entry.name.to_lowercase().contains(n))
            })
            .map(|e| e.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn get_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<CatalogEntry>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .entries(catalog)
            .iter()
            .find(|e| e.entry.slug == slug)
            .map(|e| e.entry.clone()))
    }

    async fn get_entry_id(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<i64>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .entries(catalog)
            .iter()
            .find(|e| e.entry.slug == slug)
            .map(|e| e.id))
    }

    async fn create_entry(
        &self,
        catalog: Catalog,
        req: CreateCatalogEntryRequest,
    ) -> RepoResult<CatalogEntry> {
        let mut store = self.store.lock().unwrap();
        if store.entries(catalog).iter().any(|e| e.entry.slug == req.slug) {
            return Err(unique("slug_key"));
        }
        let id = store.next_id();
        let entry = CatalogEntry {
            name: req.name,
            slug: req.slug,
        };
        store.entries_mut(catalog).push(StoredEntry {
            id,
            entry: entry.clone(),
        });
        Ok(entry)
    }

    async fn update_entry(
        &self,
        catalog: Catalog,
        slug: &str,
        req: UpdateCatalogEntryRequest,
    ) -> RepoResult<Option<CatalogEntry>> {
        let mut store = self.store.lock().unwrap();
        if let Some(new_slug) = &req.slug {
            if new_slug != slug && store.entries(catalog).iter().any(|e| &e.entry.slug == new_slug)
            {
                return Err(unique("slug_key"));
            }
        }
        Ok(store
            .entries_mut(catalog)
            .iter_mut()
            .find(|e| e.entry.slug == slug)
            .map(|e| {
                if let Some(name) = req.name {
                    e.entry.name = name;
                }
                if let Some(slug) = req.slug {
                    e.entry.slug = slug;
                }
                e.entry.clone()
            }))
    }

    async fn delete_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<bool> {
        let mut store = self.store.lock().unwrap();
        let Some(id) = store
            .entries(catalog)
            .iter()
            .find(|e| e.entry.slug == slug)
            .map(|e| e.id)
        else {
            return Ok(false);
        };
        store.entries_mut(catalog).retain(|e| e.id != id);
        for title in store.titles.iter_mut() {
            match catalog {
                Catalog::Categories if title.category_id == Some(id) => title.category_id = None,
                Catalog::Genres => title.genre_ids.retain(|g| *g != id),
                _ => {}
            }
        }
        Ok(true)
    }

    async fn list_titles(&self, filter: TitleFilter) -> RepoResult<Vec<Title>> {
        let store = self.store.lock().unwrap();
        let titles: Vec<Title> = store
            .titles
            .iter()
            .map(|t| store.title(t))
            .filter(|t| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|slug| t.category.as_ref().is_some_and(|c| c.slug == slug))
            })
            .filter(|t| {
                filter
                    .genre
                    .as_deref()
                    .is_none_or(|slug| t.genre.iter().any(|g| g.slug == slug))
            })
            .filter(|t| {
                filter
                    .name
                    .as_deref()
                    .is_none_or(|n| t.name.to_lowercase().contains(&n.to_lowercase()))
            })
            .filter(|t| filter.year.is_none_or(|y| t.year == y))
            .collect();
        Ok(titles)
    }

    async fn get_title(&self, id: i64) -> RepoResult<Option<Title>> {
        let store = self.store.lock().unwrap();
        Ok(store.titles.iter().find(|t| t.id == id).map(|t| store.title(t)))
    }

    async fn create_title(&self, title: NewTitle) -> RepoResult<Title> {
        let mut store = self.store.lock().unwrap();
        let id = store.next_id();
        let stored = StoredTitle {
            id,
            name: title.name,
            year: title.year,
            description: title.description,
            category_id: title.category_id,
            genre_ids: title.genre_ids,
        };
        let created = store.title(&stored);
        store.titles.push(stored);
        Ok(created)
    }

    async fn update_title(&self, id: i64, changes: TitleChanges) -> RepoResult<Option<Title>> {
        let mut store = self.store.lock().unwrap();
        let Some(stored) = store.titles.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        if let Some(v) = changes.name {
            stored.name = v;
        }
        if let Some(v) = changes.year {
            stored.year = v;
        }
        if let Some(v) = changes.description {
            stored.description = v;
        }
        if let Some(v) = changes.category_id {
            stored.category_id = v;
        }
        if let Some(v) = changes.genre_ids {
            stored.genre_ids = v;
        }
        Ok(store.titles.iter().find(|t| t.id == id).map(|t| store.title(t)))
    }

    async fn delete_title(&self, id: i64) -> RepoResult<bool> {
        let mut store = self.store.lock().unwrap();
        let before = store.titles.len();
        store.titles.retain(|t| t.id != id);
        if store.titles.len() == before {
            return Ok(false);
        }
        store.drop_reviews(|r| r.title_id == id);
        Ok(true)
    }

    async fn list_reviews(&self, title_id: i64) -> RepoResult<Vec<Review>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .reviews
            .iter()
            .filter(|r| r.title_id == title_id)
            .cloned()
            .collect())
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> RepoResult<Option<Review>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .reviews
            .iter()
            .find(|r| r.id == review_id && r.title_id == title_id)
            .cloned())
    }

    async fn find_review_by_author(
        &self,
        title_id: i64,
        author_id: Uuid,
    ) -> RepoResult<Option<Review>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .reviews
            .iter()
            .find(|r| r.title_id == title_id && r.author_id == author_id)
            .cloned())
    }

    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review> {
        let mut store = self.store.lock().unwrap();
        if store
            .reviews
            .iter()
            .any(|r| r.title_id == title_id && r.author_id == author_id)
        {
            return Err(unique("unique_review_per_author"));
        }
        let review = Review {
            id: store.next_id(),
            title_id,
            author_id,
            author: store.username(author_id),
            text: req.text,
            score: req.score,
            pub_date: Utc::now(),
        };
        store.reviews.push(review.clone());
        Ok(review)
    }

    async fn update_review(
        &self,
        review_id: i64,
        req: UpdateReviewRequest,
    ) -> RepoResult<Option<Review>> {
        let mut store = self.store.lock().unwrap();
        Ok(store.reviews.iter_mut().find(|r| r.id == review_id).map(|r| {
            if let Some(text) = req.text {
                r.text = text;
            }
            if let Some(score) = req.score {
                r.score = score;
            }
            r.clone()
        }))
    }

    async fn delete_review(&self, review_id: i64) -> RepoResult<bool> {
        let mut store = self.store.lock().unwrap();
        let existed = store.reviews.iter().any(|r| r.id == review_id);
        store.drop_reviews(|r| r.id == review_id);
        Ok(existed)
    }

    async fn list_comments(&self, review_id: i64) -> RepoResult<Vec<Comment>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .comments
            .iter()
            .filter(|c| c.review_id == review_id)
            .cloned()
            .collect())
    }

    async fn get_comment(&self, review_id: i64, comment_id: i64) -> RepoResult<Option<Comment>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .comments
            .iter()
            .find(|c| c.id == comment_id && c.review_id == review_id)
            .cloned())
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> RepoResult<Comment> {
        let mut store = self.store.lock().unwrap();
        let comment = Comment {
            id: store.next_id(),
            review_id,
            author_id,
            author: store.username(author_id),
            text,
            pub_date: Utc::now(),
        };
        store.comments.push(comment.clone());
        Ok(comment)
    }

    async fn update_comment(&self, comment_id: i64, text: String) -> RepoResult<Option<Comment>> {
        let mut store = self.store.lock().unwrap();
        Ok(store.comments.iter_mut().find(|c| c.id == comment_id).map(|c| {
            c.text = text;
            c.clone()
        }))
    }

    async fn delete_comment(&self, comment_id: i64) -> RepoResult<bool> {
        let mut store = self.store.lock().unwrap();
        let before = store.comments.len();
        store.comments.retain(|c| c.id != comment_id);
        Ok(store.comments.len() != before)
    }
}

// --- STATE & REQUEST HELPERS ---

pub struct TestApp {
    pub repo: Arc<InMemoryRepository>,
    pub mailer: MockMailer,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_mailer(MockMailer::new())
    }

    pub fn with_mailer(mailer: MockMailer) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let state = AppState::new(
            repo.clone() as RepositoryState,
            Arc::new(mailer.clone()) as MailerState,
            AppConfig::default(),
        );
        TestApp {
            repo,
            mailer,
            state,
        }
    }

    pub fn router(&self) -> Router {
        yamdb_api::create_router(self.state.clone())
    }

    /// `Authorization` header value for a fresh access token of `user`.
    pub fn bearer(&self, user: &User) -> String {
        let pair = issue_token_pair(&self.state.config, user.id).unwrap();
        format!("Bearer {}", pair.access)
    }

    /// Sends one request through the full router and returns the status and JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&User>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = auth {
            builder = builder.header(header::AUTHORIZATION, self.bearer(user));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    /// Creates a title through the repository, with optional category and genres given
    /// by slug (they must already exist).
    pub async fn seed_title(
        &self,
        name: &str,
        year: i32,
        category: Option<&str>,
        genres: &[&str],
    ) -> Title {
        let category_id = match category {
            Some(slug) => self.repo.get_entry_id(Catalog::Categories, slug).await.unwrap(),
            None => None,
        };
        let mut genre_ids = Vec::new();
        for slug in genres {
            genre_ids.push(
                self.repo
                    .get_entry_id(Catalog::Genres, slug)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        self.repo
            .create_title(NewTitle {
                name: name.to_string(),
                year,
                description: String::new(),
                category_id,
                genre_ids,
            })
            .await
            .unwrap()
    }

    pub async fn seed_review(&self, title_id: i64, author: &User, score: i16) -> Review {
        self.repo
            .create_review(
                title_id,
                author.id,
                CreateReviewRequest {
                    text: format!("review by {}", author.username),
                    score,
                },
            )
            .await
            .unwrap()
    }
}
