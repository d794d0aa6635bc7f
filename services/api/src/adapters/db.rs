//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dailylit_core::domain::{Book, Chunk, Edition, Subscription, SubscriptionStatus, User};
use dailylit_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps a unique-violation into the `Duplicate` port error so callers can
/// branch on it, and everything else into `Unexpected`.
fn map_insert_err(e: sqlx::Error, what: &str) -> PortError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return PortError::Duplicate(what.to_string());
        }
    }
    PortError::Unexpected(e.to_string())
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email_enc: String,
    email_lookup: String,
    username: Option<String>,
    password_hash: Option<String>,
    claimed: bool,
    timezone: String,
    created_at: DateTime<Utc>,
}

impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email_enc: self.email_enc,
            email_lookup: self.email_lookup,
            username: self.username,
            password_hash: self.password_hash,
            claimed: self.claimed,
            timezone: self.timezone,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct BookRecord {
    book_id: String,
    parent_id: String,
    title: String,
    author: String,
    total_chunks: i32,
    source_url: Option<String>,
    edition: String,
    chunk_words: i32,
    cover_path: Option<String>,
    blurb: Option<String>,
}

impl BookRecord {
    fn to_domain(self) -> Book {
        Book {
            book_id: self.book_id,
            parent_id: self.parent_id,
            title: self.title,
            author: self.author,
            total_chunks: self.total_chunks,
            source_url: self.source_url,
            // Rows are only ever written with a known edition tag.
            edition: Edition::parse(&self.edition).unwrap_or(Edition::Standard),
            chunk_words: self.chunk_words,
            cover_path: self.cover_path,
            blurb: self.blurb,
        }
    }
}

#[derive(FromRow)]
struct ChunkRecord {
    book_id: String,
    sequence: i32,
    content: String,
    word_count: i32,
    recap: Option<String>,
}

impl ChunkRecord {
    fn to_domain(self) -> Chunk {
        Chunk {
            book_id: self.book_id,
            sequence: self.sequence,
            content: self.content,
            word_count: self.word_count,
            recap: self.recap,
        }
    }
}

#[derive(FromRow)]
struct SubscriptionRecord {
    id: Uuid,
    user_id: Uuid,
    book_id: String,
    current_sequence: i32,
    status: String,
    created_at: DateTime<Utc>,
    last_sent: Option<DateTime<Utc>>,
    delivery_hour: Option<i32>,
}

impl SubscriptionRecord {
    fn to_domain(self) -> Subscription {
        Subscription {
            id: self.id,
            user_id: self.user_id,
            book_id: self.book_id,
            current_sequence: self.current_sequence,
            status: SubscriptionStatus::parse(&self.status)
                .unwrap_or(SubscriptionStatus::Unsubscribed),
            created_at: self.created_at,
            last_sent: self.last_sent,
            delivery_hour: self.delivery_hour,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, user: &User) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO users (id, email_enc, email_lookup, username, password_hash, claimed, timezone, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.email_enc)
        .bind(&user.email_lookup)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.claimed)
        .bind(&user.timezone)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "user"))?;
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email_enc, email_lookup, username, password_hash, claimed, timezone, created_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_user_by_lookup(&self, email_lookup: &str) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email_enc, email_lookup, username, password_hash, claimed, timezone, created_at
             FROM users WHERE email_lookup = $1",
        )
        .bind(email_lookup)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email_enc, email_lookup, username, password_hash, claimed, timezone, created_at
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn claim_user(
        &self,
        user_id: Uuid,
        username: &str,
        password_hash: &str,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET username = $1, password_hash = $2, claimed = TRUE WHERE id = $3",
        )
        .bind(username)
        .bind(password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "username"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn set_user_timezone(&self, user_id: Uuid, timezone: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET timezone = $1 WHERE id = $2")
            .bind(timezone)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn insert_book(&self, book: &Book) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO books (book_id, parent_id, title, author, total_chunks, source_url, edition, chunk_words, cover_path, blurb)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&book.book_id)
        .bind(&book.parent_id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.total_chunks)
        .bind(&book.source_url)
        .bind(book.edition.as_str())
        .bind(book.chunk_words)
        .bind(&book.cover_path)
        .bind(&book.blurb)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "book"))?;
        Ok(())
    }

    async fn get_book(&self, book_id: &str) -> PortResult<Option<Book>> {
        let record = sqlx::query_as::<_, BookRecord>(
            "SELECT book_id, parent_id, title, author, total_chunks, source_url, edition, chunk_words, cover_path, blurb
             FROM books WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn list_books(&self) -> PortResult<Vec<Book>> {
        let records = sqlx::query_as::<_, BookRecord>(
            "SELECT book_id, parent_id, title, author, total_chunks, source_url, edition, chunk_words, cover_path, blurb
             FROM books ORDER BY title ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (book_id, sequence, content, word_count, recap)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&chunk.book_id)
            .bind(chunk.sequence)
            .bind(&chunk.content)
            .bind(chunk.word_count)
            .bind(&chunk.recap)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_err(e, "chunk"))?;
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_chunk(&self, book_id: &str, sequence: i32) -> PortResult<Option<Chunk>> {
        let record = sqlx::query_as::<_, ChunkRecord>(
            "SELECT book_id, sequence, content, word_count, recap
             FROM chunks WHERE book_id = $1 AND sequence = $2",
        )
        .bind(book_id)
        .bind(sequence)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn total_word_count(&self, book_id: &str) -> PortResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(word_count)::BIGINT FROM chunks WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(total.unwrap_or(0))
    }

    async fn books_missing_recaps(&self) -> PortResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT book_id FROM chunks WHERE sequence > 1 AND recap IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(ids)
    }

    async fn chunks_missing_recaps(&self, book_id: &str) -> PortResult<Vec<Chunk>> {
        let records = sqlx::query_as::<_, ChunkRecord>(
            "SELECT book_id, sequence, content, word_count, recap
             FROM chunks WHERE book_id = $1 AND sequence > 1 AND recap IS NULL
             ORDER BY sequence ASC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_chunk_recap(&self, book_id: &str, sequence: i32, recap: &str) -> PortResult<()> {
        sqlx::query("UPDATE chunks SET recap = $1 WHERE book_id = $2 AND sequence = $3")
            .bind(recap)
            .bind(book_id)
            .bind(sequence)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn insert_subscription(&self, sub: &Subscription) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO subscriptions (id, user_id, book_id, current_sequence, status, created_at, last_sent, delivery_hour)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(sub.id)
        .bind(sub.user_id)
        .bind(&sub.book_id)
        .bind(sub.current_sequence)
        .bind(sub.status.as_str())
        .bind(sub.created_at)
        .bind(sub.last_sent)
        .bind(sub.delivery_hour)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "subscription"))?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT id, user_id, book_id, current_sequence, status, created_at, last_sent, delivery_hour
             FROM subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn find_subscription(
        &self,
        user_id: Uuid,
        book_id: &str,
    ) -> PortResult<Option<Subscription>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT id, user_id, book_id, current_sequence, status, created_at, last_sent, delivery_hour
             FROM subscriptions WHERE user_id = $1 AND book_id = $2",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn active_subscription_ids(&self) -> PortResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM subscriptions WHERE status = 'active' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(ids)
    }

    async fn subscriptions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Subscription>> {
        let records = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT id, user_id, book_id, current_sequence, status, created_at, last_sent, delivery_hour
             FROM subscriptions WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Subscription {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn advance_subscription(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE subscriptions SET current_sequence = current_sequence + 1, last_sent = $1
             WHERE id = $2",
        )
        .bind(sent_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Subscription {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn touch_last_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()> {
        let result = sqlx::query("UPDATE subscriptions SET last_sent = $1 WHERE id = $2")
            .bind(sent_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Subscription {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn activate_oldest_queued(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        // Single conditional update: pick the oldest queued row and promote it
        // in one statement so the completion transition stays atomic.
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "UPDATE subscriptions
             SET status = 'active', current_sequence = 1, last_sent = NULL
             WHERE id = (
                 SELECT id FROM subscriptions
                 WHERE user_id = $1 AND status = 'queued'
                 ORDER BY created_at ASC
                 LIMIT 1
             )
             RETURNING id, user_id, book_id, current_sequence, status, created_at, last_sent, delivery_hour",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn completed_books_for_user(&self, user_id: Uuid) -> PortResult<Vec<Book>> {
        let records = sqlx::query_as::<_, BookRecord>(
            "SELECT b.book_id, b.parent_id, b.title, b.author, b.total_chunks, b.source_url, b.edition, b.chunk_words, b.cover_path, b.blurb
             FROM books b
             JOIN subscriptions s ON s.book_id = b.book_id
             WHERE s.user_id = $1 AND s.status = 'completed'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}
