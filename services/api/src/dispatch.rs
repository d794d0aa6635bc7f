//! services/api/src/dispatch.rs
//!
//! The delivery state machine. One entry point per subscription
//! (`dispatch_one`) shared by the scheduled sweep, the mailed "read the next
//! part now" link, and the operator CLI. Every outcome is terminal for this
//! cycle: either the email went out and the cursor advanced, or nothing in
//! the database changed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use dailylit_core::domain::{Book, Edition, Subscription, SubscriptionStatus, User};
use dailylit_core::ports::{DatabaseService, Mailer, PortResult, RecapService};
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::render::{self, ChunkEmail, VictoryEmail};
use crate::security::{EmailCipher, TokenCodec, TokenPurpose};

/// How many recommendations a victory email carries.
const RECOMMENDATION_COUNT: usize = 3;

/// What caused this dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The hourly sweep; gated on the subscriber's local delivery hour and
    /// once-per-day idempotence.
    Scheduled,
    /// A mailed link or operator command; gated only on the binge cooldown.
    Manual,
}

/// Terminal result of one dispatch cycle for one subscription.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Mail was accepted and state was updated.
    Sent(String),
    /// Nothing was due; no state changed. The message is user-presentable.
    Skipped(String),
    /// Something went wrong; no state changed.
    Failed(String),
}

impl DispatchOutcome {
    pub fn message(&self) -> &str {
        match self {
            DispatchOutcome::Sent(m)
            | DispatchOutcome::Skipped(m)
            | DispatchOutcome::Failed(m) => m,
        }
    }
}

/// Counters for one full sweep, for the run-complete log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub sent: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Orchestrates chunk delivery over the database, recap and mail ports.
pub struct DispatchEngine {
    db: Arc<dyn DatabaseService>,
    recap: Arc<dyn RecapService>,
    mailer: Arc<dyn Mailer>,
    cipher: EmailCipher,
    tokens: TokenCodec,
    base_url: String,
    /// Default subscriber-local delivery hour, overridable per subscription.
    delivery_hour: i32,
    cooldown_minutes: i64,
}

impl DispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn DatabaseService>,
        recap: Arc<dyn RecapService>,
        mailer: Arc<dyn Mailer>,
        cipher: EmailCipher,
        tokens: TokenCodec,
        base_url: String,
        delivery_hour: i32,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            db,
            recap,
            mailer,
            cipher,
            tokens,
            base_url,
            delivery_hour,
            cooldown_minutes,
        }
    }

    /// Runs one pass over every active subscription. Failures are isolated:
    /// one bad subscription never stops the sweep.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> SweepStats {
        info!("starting dispatch sweep");
        let ids = match self.db.active_subscription_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "could not list active subscriptions; aborting sweep");
                return SweepStats::default();
            }
        };

        let mut stats = SweepStats::default();
        for id in ids {
            match self.dispatch_one(id, Trigger::Scheduled, now).await {
                DispatchOutcome::Sent(msg) => {
                    stats.sent += 1;
                    info!(subscription = %id, %msg, "sent");
                }
                DispatchOutcome::Skipped(reason) => {
                    stats.skipped += 1;
                    debug!(subscription = %id, %reason, "skipped");
                }
                DispatchOutcome::Failed(reason) => {
                    stats.failed += 1;
                    warn!(subscription = %id, %reason, "dispatch failed");
                }
            }
        }

        info!(
            sent = stats.sent,
            skipped = stats.skipped,
            failed = stats.failed,
            "dispatch sweep complete"
        );
        stats
    }

    /// Runs one dispatch cycle for one subscription. Never returns an error:
    /// every port failure collapses into `Failed`, leaving state untouched.
    pub async fn dispatch_one(
        &self,
        sub_id: Uuid,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        match self.process(sub_id, trigger, now).await {
            Ok(outcome) => outcome,
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    async fn process(
        &self,
        sub_id: Uuid,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> PortResult<DispatchOutcome> {
        let sub = match self.db.get_subscription(sub_id).await? {
            Some(sub) => sub,
            None => {
                return Ok(DispatchOutcome::Failed(format!(
                    "subscription {} not found",
                    sub_id
                )))
            }
        };

        // Completed subscriptions still answer manual triggers (a stale
        // mailed link re-delivers the victory email); everything else that
        // is not active is refused here.
        match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Completed => {}
            other => {
                return Ok(DispatchOutcome::Skipped(format!(
                    "subscription is not active (status: {})",
                    other.as_str()
                )));
            }
        }

        if trigger == Trigger::Manual {
            if let Some(reason) = self.cooldown_remaining(&sub, now) {
                return Ok(DispatchOutcome::Skipped(reason));
            }
        }

        let user = self.db.get_user_by_id(sub.user_id).await?;

        if trigger == Trigger::Scheduled {
            if let Some(reason) = self.schedule_gate(&sub, &user, now) {
                return Ok(DispatchOutcome::Skipped(reason));
            }
        }

        let email = match self.cipher.decrypt_email(&user.email_enc) {
            Ok(email) => email,
            Err(e) => {
                // Unrecoverable address; skip rather than advance past
                // content the subscriber never saw.
                error!(user = %user.id, error = %e, "stored email failed to decrypt");
                return Ok(DispatchOutcome::Failed(
                    "stored email could not be decrypted".to_string(),
                ));
            }
        };

        let book = match self.db.get_book(&sub.book_id).await? {
            Some(book) => book,
            None => {
                return Ok(DispatchOutcome::Failed(format!(
                    "book {} missing from catalog",
                    sub.book_id
                )));
            }
        };

        match self.db.get_chunk(&sub.book_id, sub.current_sequence).await? {
            Some(chunk) => {
                self.send_chunk(&sub, &book, &email, &chunk.content, chunk.recap.as_deref(), now)
                    .await
            }
            None => self.send_victory(&sub, &book, &user, &email, now).await,
        }
    }

    /// Minutes left on the binge cooldown, as a user-presentable refusal.
    /// `None` means the cooldown has elapsed (or never applied).
    fn cooldown_remaining(&self, sub: &Subscription, now: DateTime<Utc>) -> Option<String> {
        let last = sub.last_sent?;
        let window = Duration::minutes(self.cooldown_minutes);
        let elapsed = now - last;
        if elapsed >= window {
            return None;
        }
        // Whole minutes, rounded up, so the number shown always decreases as
        // time passes and never reads "0 minutes".
        let remaining_secs = (window - elapsed).num_seconds();
        let minutes = (remaining_secs + 59) / 60;
        Some(format!(
            "Please wait {} more minute{} before requesting the next part.",
            minutes,
            if minutes == 1 { "" } else { "s" }
        ))
    }

    /// The scheduled-trigger gate: right local hour, and not already sent
    /// today in the subscriber's zone.
    fn schedule_gate(
        &self,
        sub: &Subscription,
        user: &User,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let tz: Tz = match user.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(user = %user.id, timezone = %user.timezone, "unknown timezone, using UTC");
                chrono_tz::UTC
            }
        };
        let local_now = now.with_timezone(&tz);

        let hour = sub.delivery_hour.unwrap_or(self.delivery_hour);
        if local_now.hour() as i32 != hour {
            return Some(format!(
                "outside delivery hour (local {}:00, wants {}:00)",
                local_now.hour(),
                hour
            ));
        }

        if let Some(last) = sub.last_sent {
            if last.with_timezone(&tz).date_naive() == local_now.date_naive() {
                return Some("already sent today".to_string());
            }
        }

        None
    }

    async fn send_chunk(
        &self,
        sub: &Subscription,
        book: &Book,
        email: &str,
        content: &str,
        recap: Option<&str>,
        now: DateTime<Utc>,
    ) -> PortResult<DispatchOutcome> {
        let subject = format!("{}: Part {}", book.title, sub.current_sequence);
        let subject_id = sub.id.to_string();

        let total = book.total_chunks.max(1) as i64;
        let progress_pct = (100 * sub.current_sequence as i64 / total).max(1);

        let html = render::chunk_email(&ChunkEmail {
            title: &book.title,
            sequence: sub.current_sequence,
            content,
            // Part 1 never carries a recap box, whatever is stored.
            recap: if sub.current_sequence > 1 { recap } else { None },
            progress_pct,
            base_url: &self.base_url,
            unsub_token: &self.tokens.issue(&subject_id, TokenPurpose::Unsubscribe),
            binge_token: &self.tokens.issue(&subject_id, TokenPurpose::Binge),
            profile_token: &self.tokens.issue(&sub.user_id.to_string(), TokenPurpose::Profile),
        });

        if let Err(e) = self.mailer.send(email, &subject, &html).await {
            return Ok(DispatchOutcome::Failed(format!("send failed: {}", e)));
        }

        // Only a confirmed send moves the cursor.
        self.db.advance_subscription(sub.id, now).await?;

        Ok(DispatchOutcome::Sent(format!(
            "Part {} of \"{}\" is on its way.",
            sub.current_sequence, book.title
        )))
    }

    /// The cursor has walked past the last chunk: celebrate, recommend, and
    /// promote the oldest queued book if this is a first-time completion.
    async fn send_victory(
        &self,
        sub: &Subscription,
        book: &Book,
        user: &User,
        email: &str,
        now: DateTime<Utc>,
    ) -> PortResult<DispatchOutcome> {
        let days_taken = (now - sub.created_at).num_days().max(1);
        let total_words = self.db.total_word_count(&book.book_id).await?;

        let completed = self.db.completed_books_for_user(sub.user_id).await?;
        let read_parents: HashSet<&str> = completed
            .iter()
            .map(|b| b.parent_id.as_str())
            .chain(std::iter::once(book.parent_id.as_str()))
            .collect();
        let mut read_titles: Vec<String> = completed.iter().map(|b| b.title.clone()).collect();
        read_titles.push(book.title.clone());

        // Recommendation pool: standard editions of works the reader has not
        // touched, excluding every edition of the book just finished.
        let candidates: Vec<Book> = self
            .db
            .list_books()
            .await?
            .into_iter()
            .filter(|b| b.edition == Edition::Standard)
            .filter(|b| !read_parents.contains(b.parent_id.as_str()))
            .collect();

        let recommendations = self.pick_recommendations(&read_titles, &candidates).await;

        // Only a first-time completion pulls the next book off the queue;
        // re-delivered victory emails leave the queue alone.
        let next_book = if sub.status == SubscriptionStatus::Active {
            match self.db.activate_oldest_queued(sub.user_id).await? {
                Some(next) => self.db.get_book(&next.book_id).await?,
                None => None,
            }
        } else {
            None
        };

        let html = render::victory_email(&VictoryEmail {
            title: &book.title,
            days_taken,
            total_words,
            recommendations: &recommendations,
            next_book: next_book.as_ref(),
            base_url: &self.base_url,
            profile_token: &self.tokens.issue(&user.id.to_string(), TokenPurpose::Profile),
        });

        let subject = format!("You finished {}!", book.title);
        if let Err(e) = self.mailer.send(email, &subject, &html).await {
            return Ok(DispatchOutcome::Failed(format!("send failed: {}", e)));
        }

        if sub.status == SubscriptionStatus::Active {
            self.db
                .set_subscription_status(sub.id, SubscriptionStatus::Completed)
                .await?;
        }
        // Victory sends count against the binge cooldown too, or a stale
        // mailed link could fire recommendation calls without limit.
        self.db.touch_last_sent(sub.id, now).await?;

        Ok(DispatchOutcome::Sent(format!(
            "Completion email for \"{}\" sent.",
            book.title
        )))
    }

    /// AI-ranked picks when the model cooperates, a uniform random sample
    /// when it does not. Model output is only trusted for ids that actually
    /// exist in the candidate pool.
    async fn pick_recommendations(
        &self,
        read_titles: &[String],
        candidates: &[Book],
    ) -> Vec<Book> {
        if candidates.is_empty() {
            return Vec::new();
        }

        match self.recap.recommend(read_titles, candidates).await {
            Ok(ids) if !ids.is_empty() => {
                let picked: Vec<Book> = ids
                    .iter()
                    .filter_map(|id| candidates.iter().find(|b| &b.book_id == id).cloned())
                    .take(RECOMMENDATION_COUNT)
                    .collect();
                if !picked.is_empty() {
                    return picked;
                }
                debug!("model recommendations matched no candidates, sampling instead");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "recommendation call failed, sampling instead");
            }
        }

        candidates
            .choose_multiple(&mut rand::thread_rng(), RECOMMENDATION_COUNT)
            .cloned()
            .collect()
    }
}
