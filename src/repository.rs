use crate::models::{
    Catalog, CatalogEntry, Comment, CreateCatalogEntryRequest, CreateReviewRequest,
    CreateUserRequest, NewTitle, Review, Title, TitleChanges, TitleFilter, TitleRow,
    UpdateCatalogEntryRequest, UpdateReviewRequest, UpdateUserRequest, User,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, sqlx::Error>;

const LIKE_ESCAPE: &str = r" ESCAPE '\'";

/// `ILIKE` pattern matching `term` as a literal substring.
fn substring_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers only see this trait, which
/// lets the test-suite swap Postgres for an in-memory implementation.
///
/// Lookups return `Ok(None)` for a missing row; deletes return whether a row was removed.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    /// Atomic get-or-create keyed by email. New rows start inactive; existing rows are
    /// returned unchanged.
    async fn get_or_create_pending_user(&self, email: &str, username: &str) -> RepoResult<User>;
    /// Activates the account and stamps `last_login`.
    async fn record_login(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn list_users(&self, search: Option<String>) -> RepoResult<Vec<User>>;
    async fn create_user(&self, req: CreateUserRequest) -> RepoResult<User>;
    async fn update_user(&self, id: Uuid, req: UpdateUserRequest) -> RepoResult<Option<User>>;
    async fn delete_user(&self, id: Uuid) -> RepoResult<bool>;

    // --- Categories & genres ---
    async fn list_entries(
        &self,
        catalog: Catalog,
        search: Option<String>,
    ) -> RepoResult<Vec<CatalogEntry>>;
    async fn get_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<CatalogEntry>>;
    async fn get_entry_id(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<i64>>;
    async fn create_entry(
        &self,
        catalog: Catalog,
        req: CreateCatalogEntryRequest,
    ) -> RepoResult<CatalogEntry>;
    async fn update_entry(
        &self,
        catalog: Catalog,
        slug: &str,
        req: UpdateCatalogEntryRequest,
    ) -> RepoResult<Option<CatalogEntry>>;
    async fn delete_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<bool>;

    // --- Titles ---
    // Every returned title carries its aggregated rating.
    async fn list_titles(&self, filter: TitleFilter) -> RepoResult<Vec<Title>>;
    async fn get_title(&self, id: i64) -> RepoResult<Option<Title>>;
    async fn create_title(&self, title: NewTitle) -> RepoResult<Title>;
    async fn update_title(&self, id: i64, changes: TitleChanges) -> RepoResult<Option<Title>>;
    async fn delete_title(&self, id: i64) -> RepoResult<bool>;

    // --- Reviews ---
    async fn list_reviews(&self, title_id: i64) -> RepoResult<Vec<Review>>;
    /// Only matches when the review belongs to `title_id`.
    async fn get_review(&self, title_id: i64, review_id: i64) -> RepoResult<Option<Review>>;
    async fn find_review_by_author(
        &self,
        title_id: i64,
        author_id: Uuid,
    ) -> RepoResult<Option<Review>>;
    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review>;
    async fn update_review(
        &self,
        review_id: i64,
        req: UpdateReviewRequest,
    ) -> RepoResult<Option<Review>>;
    async fn delete_review(&self, review_id: i64) -> RepoResult<bool>;

    // --- Comments ---
    async fn list_comments(&self, review_id: i64) -> RepoResult<Vec<Comment>>;
    async fn get_comment(&self, review_id: i64, comment_id: i64) -> RepoResult<Option<Comment>>;
    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> RepoResult<Comment>;
    async fn update_comment(&self, comment_id: i64, text: String) -> RepoResult<Option<Comment>>;
    async fn delete_comment(&self, comment_id: i64) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// All queries are runtime-checked (`query_as::<_, T>`) so the crate builds without a
/// live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads genres for a batch of title rows in one query and assembles the read models.
    async fn attach_genres(&self, rows: Vec<TitleRow>) -> RepoResult<Vec<Title>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let links: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT tg.title_id, g.name, g.slug
            FROM title_genres tg
            JOIN genres g ON g.id = tg.genre_id
            WHERE tg.title_id = ANY($1)
            ORDER BY g.slug
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_title: HashMap<i64, Vec<CatalogEntry>> = HashMap::new();
        for (title_id, name, slug) in links {
            by_title
                .entry(title_id)
                .or_default()
                .push(CatalogEntry { name, slug });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let genre = by_title.remove(&row.id).unwrap_or_default();
                Title::from_row(row, genre)
            })
            .collect())
    }

    async fn replace_genres(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        title_id: i64,
        genre_ids: &[i64],
    ) -> RepoResult<()> {
        sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
            .bind(title_id)
            .execute(&mut **tx)
            .await?;
        if !genre_ids.is_empty() {
            sqlx::query(
                "INSERT INTO title_genres (title_id, genre_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
            )
            .bind(title_id)
            .bind(genre_ids)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, bio, role, is_superuser, is_active, last_login";

// Titles joined with their mean score; LEFT JOIN keeps unreviewed titles with a NULL rating.
const TITLE_SELECT: &str = r#"
    SELECT t.id, t.name, t.year, t.description,
           AVG(r.score)::float8 AS rating,
           c.name AS category_name, c.slug AS category_slug
    FROM titles t
    LEFT JOIN categories c ON c.id = t.category_id
    LEFT JOIN reviews r ON r.title_id = t.id
    WHERE TRUE
"#;

const TITLE_GROUP: &str = " GROUP BY t.id, c.name, c.slug";

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.title_id, r.author_id, u.username AS author, r.text, r.score, r.pub_date
    FROM reviews r
    JOIN users u ON u.id = r.author_id
"#;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.review_id, c.author_id, u.username AS author, c.text, c.pub_date
    FROM comments c
    JOIN users u ON u.id = c.author_id
"#;

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    /// get_or_create_pending_user
    ///
    /// A single upsert: the no-op `DO UPDATE` makes `RETURNING` yield the existing row on
    /// conflict, so concurrent identical requests converge on one record.
    async fn get_or_create_pending_user(&self, email: &str, username: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, is_active)
            VALUES ($1, $2, $3, false)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }

    async fn record_login(&self, id: Uuid) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_active = true, last_login = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_users(&self, search: Option<String>) -> RepoResult<Vec<User>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        if let Some(s) = search {
            builder.push(" WHERE username ILIKE ");
            builder.push_bind(substring_pattern(&s));
            builder.push(LIKE_ESCAPE);
        }
        builder.push(" ORDER BY username");
        builder.build_query_as::<User>().fetch_all(&self.pool).await
    }

    async fn create_user(&self, req: CreateUserRequest) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, first_name, last_name, bio, role, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(req.username)
        .bind(req.email)
        .bind(req.first_name)
        .bind(req.last_name)
        .bind(req.bio)
        .bind(req.role.as_str())
        .fetch_one(&self.pool)
        .await
    }

    /// update_user
    ///
    /// `COALESCE` keeps the stored value for every field the request leaves out.
    async fn update_user(&self, id: Uuid, req: UpdateUserRequest) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                bio = COALESCE($6, bio),
                role = COALESCE($7, role)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.username)
        .bind(req.email)
        .bind(req.first_name)
        .bind(req.last_name)
        .bind(req.bio)
        .bind(req.role.map(|r| r.as_str()))
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- CATALOG ---

    async fn list_entries(
        &self,
        catalog: Catalog,
        search: Option<String>,
    ) -> RepoResult<Vec<CatalogEntry>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT name, slug FROM {}", catalog.table()));
        if let Some(s) = search {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(substring_pattern(&s));
            builder.push(LIKE_ESCAPE);
        }
        builder.push(" ORDER BY name");
        builder
            .build_query_as::<CatalogEntry>()
            .fetch_all(&self.pool)
            .await
    }

    async fn get_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<CatalogEntry>> {
        sqlx::query_as::<_, CatalogEntry>(&format!(
            "SELECT name, slug FROM {} WHERE slug = $1",
            catalog.table()
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_entry_id(&self, catalog: Catalog, slug: &str) -> RepoResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(&format!(
            "SELECT id FROM {} WHERE slug = $1",
            catalog.table()
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_entry(
        &self,
        catalog: Catalog,
        req: CreateCatalogEntryRequest,
    ) -> RepoResult<CatalogEntry> {
        sqlx::query_as::<_, CatalogEntry>(&format!(
            "INSERT INTO {} (name, slug) VALUES ($1, $2) RETURNING name, slug",
            catalog.table()
        ))
        .bind(req.name)
        .bind(req.slug)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_entry(
        &self,
        catalog: Catalog,
        slug: &str,
        req: UpdateCatalogEntryRequest,
    ) -> RepoResult<Option<CatalogEntry>> {
        sqlx::query_as::<_, CatalogEntry>(&format!(
            "UPDATE {} SET name = COALESCE($2, name), slug = COALESCE($3, slug) WHERE slug = $1 RETURNING name, slug",
            catalog.table()
        ))
        .bind(slug)
        .bind(req.name)
        .bind(req.slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_entry(&self, catalog: Catalog, slug: &str) -> RepoResult<bool> {
        let res = sqlx::query(&format!("DELETE FROM {} WHERE slug = $1", catalog.table()))
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- TITLES ---

    /// list_titles
    ///
    /// Builds the filter with `QueryBuilder` so every user value is bound, never inlined.
    async fn list_titles(&self, filter: TitleFilter) -> RepoResult<Vec<Title>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(TITLE_SELECT);

        if let Some(category) = filter.category {
            builder.push(" AND c.slug = ");
            builder.push_bind(category);
        }
        if let Some(genre) = filter.genre {
            builder.push(
                " AND EXISTS (SELECT 1 FROM title_genres tg JOIN genres g ON g.id = tg.genre_id WHERE tg.title_id = t.id AND g.slug = ",
            );
            builder.push_bind(genre);
            builder.push(")");
        }
        if let Some(name) = filter.name {
            builder.push(" AND t.name ILIKE ");
            builder.push_bind(substring_pattern(&name));
            builder.push(LIKE_ESCAPE);
        }
        if let Some(year) = filter.year {
            builder.push(" AND t.year = ");
            builder.push_bind(year);
        }

        builder.push(TITLE_GROUP);
        builder.push(" ORDER BY t.id");

        let rows = builder
            .build_query_as::<TitleRow>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_genres(rows).await
    }

    async fn get_title(&self, id: i64) -> RepoResult<Option<Title>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(TITLE_SELECT);
        builder.push(" AND t.id = ");
        builder.push_bind(id);
        builder.push(TITLE_GROUP);

        let row = builder
            .build_query_as::<TitleRow>()
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.attach_genres(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// create_title
    ///
    /// Title row and genre links are written in one transaction.
    async fn create_title(&self, title: NewTitle) -> RepoResult<Title> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO titles (name, year, description, category_id) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&title.name)
        .bind(title.year)
        .bind(&title.description)
        .bind(title.category_id)
        .fetch_one(&mut *tx)
        .await?;
        Self::replace_genres(&mut tx, id, &title.genre_ids).await?;
        tx.commit().await?;

        self.get_title(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    async fn update_title(&self, id: i64, changes: TitleChanges) -> RepoResult<Option<Title>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE titles
            SET name = COALESCE($2, name),
                year = COALESCE($3, year),
                description = COALESCE($4, description),
                category_id = CASE WHEN $5 THEN $6 ELSE category_id END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.year)
        .bind(changes.description)
        .bind(changes.category_id.is_some())
        .bind(changes.category_id.flatten())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        if let Some(genre_ids) = changes.genre_ids {
            Self::replace_genres(&mut tx, id, &genre_ids).await?;
        }
        tx.commit().await?;

        self.get_title(id).await
    }

    async fn delete_title(&self, id: i64) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- REVIEWS ---

    async fn list_reviews(&self, title_id: i64) -> RepoResult<Vec<Review>> {
        sqlx::query_as::<_, Review>(&format!("{REVIEW_SELECT} WHERE r.title_id = $1 ORDER BY r.id"))
            .bind(title_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> RepoResult<Option<Review>> {
        sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE r.id = $1 AND r.title_id = $2"
        ))
        .bind(review_id)
        .bind(title_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_review_by_author(
        &self,
        title_id: i64,
        author_id: Uuid,
    ) -> RepoResult<Option<Review>> {
        sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE r.title_id = $1 AND r.author_id = $2"
        ))
        .bind(title_id)
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// create_review
    ///
    /// Insert and author join in one statement via a CTE.
    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review> {
        sqlx::query_as::<_, Review>(
            r#"
            WITH inserted AS (
                INSERT INTO reviews (title_id, author_id, text, score)
                VALUES ($1, $2, $3, $4)
                RETURNING id, title_id, author_id, text, score, pub_date
            )
            SELECT i.id, i.title_id, i.author_id, u.username AS author, i.text, i.score, i.pub_date
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(title_id)
        .bind(author_id)
        .bind(req.text)
        .bind(req.score)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_review(
        &self,
        review_id: i64,
        req: UpdateReviewRequest,
    ) -> RepoResult<Option<Review>> {
        sqlx::query_as::<_, Review>(
            r#"
            WITH updated AS (
                UPDATE reviews
                SET text = COALESCE($2, text), score = COALESCE($3, score)
                WHERE id = $1
                RETURNING id, title_id, author_id, text, score, pub_date
            )
            SELECT i.id, i.title_id, i.author_id, u.username AS author, i.text, i.score, i.pub_date
            FROM updated i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(review_id)
        .bind(req.text)
        .bind(req.score)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_review(&self, review_id: i64) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- COMMENTS ---

    async fn list_comments(&self, review_id: i64) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(&format!(
            "{COMMENT_SELECT} WHERE c.review_id = $1 ORDER BY c.id"
        ))
        .bind(review_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_comment(&self, review_id: i64, comment_id: i64) -> RepoResult<Option<Comment>> {
        sqlx::query_as::<_, Comment>(&format!(
            "{COMMENT_SELECT} WHERE c.id = $1 AND c.review_id = $2"
        ))
        .bind(comment_id)
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(
            r#"
            WITH inserted AS (
                INSERT INTO comments (review_id, author_id, text)
                VALUES ($1, $2, $3)
                RETURNING id, review_id, author_id, text, pub_date
            )
            SELECT i.id, i.review_id, i.author_id, u.username AS author, i.text, i.pub_date
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(review_id)
        .bind(author_id)
        .bind(text)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_comment(&self, comment_id: i64, text: String) -> RepoResult<Option<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"
            WITH updated AS (
                UPDATE comments SET text = $2 WHERE id = $1
                RETURNING id, review_id, author_id, text, pub_date
            )
            SELECT i.id, i.review_id, i.author_id, u.username AS author, i.text, i.pub_date
            FROM updated i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(comment_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_comment(&self, comment_id: i64) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
