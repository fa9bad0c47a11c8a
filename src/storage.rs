pub mod entities;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, instrument};
use uuid::Uuid;

use self::entities::{Feed, FeedFollow, InsertOutcome, NewPost, Post, User};

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at";

/// UTC with nanosecond digits always present, so that text order is chronological.
///
/// Used for the columns the scheduler and the post listing sort and compare on.
static SORTABLE_TIMESTAMP: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");

fn sortable(timestamp: OffsetDateTime) -> Result<String> {
    timestamp
        .to_offset(UtcOffset::UTC)
        .format(SORTABLE_TIMESTAMP)
        .with_context(|| anyhow!("could not format the timestamp {timestamp}"))
}

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    /// Returns up to `limit` feeds, least recently fetched first.
    ///
    /// Feeds that were never fetched come before everything else.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn select_feeds_due_for_fetch(&mut self, limit: u32) -> Result<Vec<Feed>> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS}
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, rowid ASC
            LIMIT ?1"
        ))
        .bind(i64::from(limit))
        .fetch_all(self.0.as_mut())
        .await
        .context("could not select feeds due for fetch")
    }

    /// Records that a feed was fetched at `fetched_at`.
    ///
    /// Never moves `last_fetched_at` backwards, so replaying an older timestamp is a no-op.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn mark_feed_fetched(
        &mut self,
        feed_id: Uuid,
        fetched_at: OffsetDateTime,
    ) -> Result<()> {
        let fetched_at = sortable(fetched_at)?;

        sqlx::query(
            "UPDATE feeds
            SET last_fetched_at = ?2, updated_at = ?2
            WHERE id = ?1
              AND (last_fetched_at IS NULL OR last_fetched_at <= ?2)",
        )
        .bind(feed_id)
        .bind(fetched_at)
        .execute(self.0.as_mut())
        .await
        .context("could not mark the feed as fetched")?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self, post), fields(post.url = %post.url))]
    pub async fn insert_post(&mut self, post: &NewPost) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT
            INTO posts (
              id,
              title,
              description,
              url,
              published_at,
              feed_id,
              created_at,
              updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (feed_id, url) DO NOTHING",
        )
        .bind(post.id)
        .bind(&post.title)
        .bind(&post.description)
        .bind(&post.url)
        .bind(sortable(post.published_at)?)
        .bind(post.feed_id)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(self.0.as_mut())
        .await
        .context("could not insert a post")?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_user(&mut self, name: &str) -> Result<User> {
        let now = OffsetDateTime::now_utc();
        let api_key = hex::encode(rand::thread_rng().gen::<[u8; 32]>());

        sqlx::query_as(
            "INSERT
            INTO users (id, name, api_key, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            RETURNING id, name, api_key, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(api_key)
        .bind(now)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not create a user")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_users(&mut self) -> Result<Vec<User>> {
        sqlx::query_as(
            "SELECT id, name, api_key, created_at, updated_at
            FROM users
            ORDER BY rowid ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the user list")
    }

    #[instrument(level = "TRACE", skip_all)]
    pub async fn get_user_by_api_key(&mut self, api_key: &str) -> Result<Option<User>> {
        sqlx::query_as(
            "SELECT id, name, api_key, created_at, updated_at
            FROM users
            WHERE api_key = ?1",
        )
        .bind(api_key)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not look up a user by API key")
    }

    /// Creates a feed owned by `user_id`.
    ///
    /// Returns `None` if a feed with the same URL already exists.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_feed(
        &mut self,
        user_id: Uuid,
        name: &str,
        url: &str,
    ) -> Result<Option<Feed>> {
        let now = OffsetDateTime::now_utc();

        sqlx::query_as(&format!(
            "INSERT
            INTO feeds (id, name, url, user_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (url) DO NOTHING
            RETURNING {FEED_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not create a feed")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feeds(&mut self) -> Result<Vec<Feed>> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS}
            FROM feeds
            ORDER BY rowid ASC"
        ))
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the feed list")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feed(&mut self, feed_id: Uuid) -> Result<Option<Feed>> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS}
            FROM feeds
            WHERE id = ?1"
        ))
        .bind(feed_id)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not retrieve the feed")
    }

    /// Makes `user_id` follow `feed_id`.
    ///
    /// Returns `None` if the user already follows the feed.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_feed_follow(
        &mut self,
        user_id: Uuid,
        feed_id: Uuid,
    ) -> Result<Option<FeedFollow>> {
        let now = OffsetDateTime::now_utc();

        sqlx::query_as(
            "INSERT
            INTO feed_follows (id, user_id, feed_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (user_id, feed_id) DO NOTHING
            RETURNING id, user_id, feed_id, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not create a feed follow")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feed_follows(&mut self, user_id: Uuid) -> Result<Vec<FeedFollow>> {
        sqlx::query_as(
            "SELECT id, user_id, feed_id, created_at, updated_at
            FROM feed_follows
            WHERE user_id = ?1
            ORDER BY rowid ASC",
        )
        .bind(user_id)
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve feed follows")
    }

    /// Returns `true` if a follow was removed.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn delete_feed_follow(&mut self, user_id: Uuid, feed_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE
            FROM feed_follows
            WHERE user_id = ?1 AND feed_id = ?2",
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(self.0.as_mut())
        .await
        .context("could not delete a feed follow")?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns the latest posts of the feeds `user_id` follows, newest first.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_posts_for_user(&mut self, user_id: Uuid, limit: u32) -> Result<Vec<Post>> {
        sqlx::query_as(
            "SELECT
              posts.id,
              posts.title,
              posts.description,
              posts.url,
              posts.published_at,
              posts.feed_id,
              posts.created_at,
              posts.updated_at
            FROM posts
              JOIN feed_follows ON (posts.feed_id = feed_follows.feed_id)
            WHERE feed_follows.user_id = ?1
            ORDER BY posts.published_at DESC, posts.rowid DESC
            LIMIT ?2",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve posts for the user")
    }

    #[cfg(test)]
    pub async fn get_feed_posts(&mut self, feed_id: Uuid) -> Result<Vec<Post>> {
        sqlx::query_as(
            "SELECT id, title, description, url, published_at, feed_id, created_at, updated_at
            FROM posts
            WHERE feed_id = ?1
            ORDER BY url ASC",
        )
        .bind(feed_id)
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve feed posts")
    }
}

#[cfg(test)]
impl Storage {
    /// Opens a private in-memory database.
    ///
    /// The pool holds a single connection that never expires, since every SQLite
    /// connection to `:memory:` sees its own database.
    pub async fn in_memory() -> Result<Self> {
        use std::str::FromStr;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(
                SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true),
            )
            .await
            .context("could not open an in-memory SQLite database")?;

        Self::with_pool(pool).await
    }

    /// Runs a statement outside of any typed query, e.g. to install a failing trigger.
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .with_context(|| anyhow!("could not execute `{sql}`"))?;

        Ok(())
    }
}
