//! crates/dailylit_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A word-count variant of the same source work. Each edition is a distinct
/// `Book` row sharing a `parent_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    Short,
    Standard,
    Long,
}

impl Edition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::Short => "short",
            Edition::Standard => "standard",
            Edition::Long => "long",
        }
    }

    /// Target words per delivered chunk for this edition.
    pub fn target_words(&self) -> i32 {
        match self {
            Edition::Short => 500,
            Edition::Standard => 1000,
            Edition::Long => 2000,
        }
    }

    pub fn parse(s: &str) -> Option<Edition> {
        match s {
            "short" => Some(Edition::Short),
            "standard" => Some(Edition::Standard),
            "long" => Some(Edition::Long),
            _ => None,
        }
    }
}

/// Lifecycle status of a subscription.
///
/// `queued -> active -> completed`, with `active <-> paused` and any
/// non-terminal status able to move to `unsubscribed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Queued,
    Paused,
    Unsubscribed,
    Completed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Queued => "queued",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Unsubscribed => "unsubscribed",
            SubscriptionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<SubscriptionStatus> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "queued" => Some(SubscriptionStatus::Queued),
            "paused" => Some(SubscriptionStatus::Paused),
            "unsubscribed" => Some(SubscriptionStatus::Unsubscribed),
            "completed" => Some(SubscriptionStatus::Completed),
            _ => None,
        }
    }
}

/// A subscriber identity. Created as a "ghost" (email only) at signup and
/// optionally claimed later with a username and password.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    /// Reversibly-encrypted email, used only when composing outgoing mail.
    pub email_enc: String,
    /// Deterministic keyed hash of the normalized email; the indexed
    /// duplicate-check key.
    pub email_lookup: String,
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub claimed: bool,
    /// IANA timezone name, e.g. "America/New_York". Unknown zones fall back
    /// to UTC at dispatch time.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

/// A catalog entry. Immutable after ingestion apart from the enrichment
/// fields (`cover_path`, `blurb`).
#[derive(Debug, Clone)]
pub struct Book {
    pub book_id: String,
    /// Links editions of the same source work.
    pub parent_id: String,
    pub title: String,
    pub author: String,
    pub total_chunks: i32,
    pub source_url: Option<String>,
    pub edition: Edition,
    pub chunk_words: i32,
    pub cover_path: Option<String>,
    pub blurb: Option<String>,
}

/// One delivery-sized slice of a book's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub book_id: String,
    /// 1-based, dense and contiguous within a book.
    pub sequence: i32,
    pub content: String,
    pub word_count: i32,
    /// Rolling "previously on" summary of the *previous* chunk, chained with
    /// everything before it. Populated offline by the backfill worker; a
    /// missing recap means the email simply shows no recap box.
    pub recap: Option<String>,
}

/// Binds a user to a book and tracks delivery progress.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: String,
    /// The next chunk to send. Once this exceeds the book's chunk count the
    /// subscription is finished.
    pub current_sequence: i32,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub last_sent: Option<DateTime<Utc>>,
    /// Per-subscription override of the configured delivery hour (0-23,
    /// subscriber-local time).
    pub delivery_hour: Option<i32>,
}
