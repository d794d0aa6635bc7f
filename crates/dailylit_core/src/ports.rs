//! crates/dailylit_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Book, Chunk, Subscription, SubscriptionStatus, User};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A record with the same identity already exists. Callers branch on this
    /// distinctly from generic failures (e.g. "email already registered").
    #[error("Already exists: {0}")]
    Duplicate(String),
    /// The provider rejected the call for quota reasons; retryable with backoff.
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user(&self, user: &User) -> PortResult<()>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_lookup(&self, email_lookup: &str) -> PortResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> PortResult<Option<User>>;

    async fn claim_user(
        &self,
        user_id: Uuid,
        username: &str,
        password_hash: &str,
    ) -> PortResult<()>;

    async fn set_user_timezone(&self, user_id: Uuid, timezone: &str) -> PortResult<()>;

    // --- Catalog ---
    async fn insert_book(&self, book: &Book) -> PortResult<()>;

    async fn get_book(&self, book_id: &str) -> PortResult<Option<Book>>;

    async fn list_books(&self) -> PortResult<Vec<Book>>;

    // --- Chunks ---
    async fn insert_chunks(&self, chunks: &[Chunk]) -> PortResult<()>;

    async fn get_chunk(&self, book_id: &str, sequence: i32) -> PortResult<Option<Chunk>>;

    async fn total_word_count(&self, book_id: &str) -> PortResult<i64>;

    /// Book ids that still have chunks (sequence > 1) without a recap.
    async fn books_missing_recaps(&self) -> PortResult<Vec<String>>;

    /// Chunks of one book missing a recap, in ascending sequence order.
    async fn chunks_missing_recaps(&self, book_id: &str) -> PortResult<Vec<Chunk>>;

    async fn set_chunk_recap(&self, book_id: &str, sequence: i32, recap: &str) -> PortResult<()>;

    // --- Subscriptions ---
    async fn insert_subscription(&self, sub: &Subscription) -> PortResult<()>;

    async fn get_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>>;

    async fn find_subscription(
        &self,
        user_id: Uuid,
        book_id: &str,
    ) -> PortResult<Option<Subscription>>;

    async fn active_subscription_ids(&self) -> PortResult<Vec<Uuid>>;

    async fn subscriptions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Subscription>>;

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> PortResult<()>;

    /// Records a successful chunk send: bumps `current_sequence` by one and
    /// stamps `last_sent`. Called only after the mail provider confirms.
    async fn advance_subscription(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()>;

    /// Stamps `last_sent` without moving the cursor. Used for victory emails,
    /// which have no next chunk but still count against the binge cooldown.
    async fn touch_last_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()>;

    /// Promotes the user's oldest queued subscription (FIFO by creation time)
    /// to active, resetting it to sequence 1 with `last_sent` cleared, as a
    /// single conditional update. Returns the activated subscription, if any.
    async fn activate_oldest_queued(&self, user_id: Uuid) -> PortResult<Option<Subscription>>;

    /// Books behind the user's completed subscriptions, for building the
    /// "already read" set during victory recommendations.
    async fn completed_books_for_user(&self, user_id: Uuid) -> PortResult<Vec<Book>>;
}

#[async_trait]
pub trait RecapService: Send + Sync {
    /// Produces a 2-3 sentence rolling recap of `current_text`, integrating
    /// `previous_recap` when present. Soft-fails after bounded retries.
    async fn summarize(
        &self,
        current_text: &str,
        previous_recap: Option<&str>,
    ) -> PortResult<String>;

    /// Ranks 3 candidate book ids against a reading history. An empty list or
    /// an error means the caller falls back to random sampling; the AI path
    /// is an enhancement, never a hard dependency.
    async fn recommend(
        &self,
        read_titles: &[String],
        candidates: &[Book],
    ) -> PortResult<Vec<String>>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one HTML email. Success means the provider accepted the message;
    /// anything else is an error for the caller to log and retry next cycle.
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> PortResult<()>;
}
