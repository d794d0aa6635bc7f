//! services/api/src/testsupport.rs
//!
//! In-memory fakes for the core ports, shared by the unit tests of the
//! dispatch engine, the user service and the web layer. Compiled only for
//! tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dailylit_core::domain::{Book, Chunk, Subscription, SubscriptionStatus, User};
use dailylit_core::ports::{DatabaseService, Mailer, PortError, PortResult, RecapService};
use uuid::Uuid;

//=========================================================================================
// FakeDb
//=========================================================================================

#[derive(Default)]
struct FakeDbInner {
    users: Vec<User>,
    books: Vec<Book>,
    chunks: Vec<Chunk>,
    subscriptions: Vec<Subscription>,
}

/// A `DatabaseService` backed by plain vectors behind a mutex.
#[derive(Default)]
pub struct FakeDb {
    inner: Mutex<FakeDbInner>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_book(&self, book: Book) {
        self.inner.lock().unwrap().books.push(book);
    }

    pub fn seed_chunk(&self, chunk: Chunk) {
        self.inner.lock().unwrap().chunks.push(chunk);
    }

    pub fn seed_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub fn seed_subscription(&self, sub: Subscription) {
        self.inner.lock().unwrap().subscriptions.push(sub);
    }

    pub fn subscription(&self, id: Uuid) -> Subscription {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .expect("subscription seeded")
    }
}

#[async_trait]
impl DatabaseService for FakeDb {
    async fn create_user(&self, user: &User) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .users
            .iter()
            .any(|u| u.email_lookup == user.email_lookup)
        {
            return Err(PortError::Duplicate("user".to_string()));
        }
        inner.users.push(user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_user_by_lookup(&self, email_lookup: &str) -> PortResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.email_lookup == email_lookup)
            .cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn claim_user(
        &self,
        user_id: Uuid,
        username: &str,
        password_hash: &str,
    ) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .users
            .iter()
            .any(|u| u.username.as_deref() == Some(username) && u.id != user_id)
        {
            return Err(PortError::Duplicate("username".to_string()));
        }
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        user.username = Some(username.to_string());
        user.password_hash = Some(password_hash.to_string());
        user.claimed = true;
        Ok(())
    }

    async fn set_user_timezone(&self, user_id: Uuid, timezone: &str) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        user.timezone = timezone.to_string();
        Ok(())
    }

    async fn insert_book(&self, book: &Book) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.books.iter().any(|b| b.book_id == book.book_id) {
            return Err(PortError::Duplicate("book".to_string()));
        }
        inner.books.push(book.clone());
        Ok(())
    }

    async fn get_book(&self, book_id: &str) -> PortResult<Option<Book>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .books
            .iter()
            .find(|b| b.book_id == book_id)
            .cloned())
    }

    async fn list_books(&self) -> PortResult<Vec<Book>> {
        Ok(self.inner.lock().unwrap().books.clone())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> PortResult<()> {
        self.inner.lock().unwrap().chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn get_chunk(&self, book_id: &str, sequence: i32) -> PortResult<Option<Chunk>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .chunks
            .iter()
            .find(|c| c.book_id == book_id && c.sequence == sequence)
            .cloned())
    }

    async fn total_word_count(&self, book_id: &str) -> PortResult<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .chunks
            .iter()
            .filter(|c| c.book_id == book_id)
            .map(|c| c.word_count as i64)
            .sum())
    }

    async fn books_missing_recaps(&self) -> PortResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner
            .chunks
            .iter()
            .filter(|c| c.sequence > 1 && c.recap.is_none())
            .map(|c| c.book_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn chunks_missing_recaps(&self, book_id: &str) -> PortResult<Vec<Chunk>> {
        let inner = self.inner.lock().unwrap();
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .iter()
            .filter(|c| c.book_id == book_id && c.sequence > 1 && c.recap.is_none())
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence);
        Ok(chunks)
    }

    async fn set_chunk_recap(&self, book_id: &str, sequence: i32, recap: &str) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner
            .chunks
            .iter_mut()
            .find(|c| c.book_id == book_id && c.sequence == sequence)
        {
            chunk.recap = Some(recap.to_string());
        }
        Ok(())
    }

    async fn insert_subscription(&self, sub: &Subscription) -> PortResult<()> {
        self.inner.lock().unwrap().subscriptions.push(sub.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn find_subscription(
        &self,
        user_id: Uuid,
        book_id: &str,
    ) -> PortResult<Option<Subscription>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.book_id == book_id)
            .cloned())
    }

    async fn active_subscription_ids(&self) -> PortResult<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .map(|s| s.id)
            .collect())
    }

    async fn subscriptions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Subscription {} not found", id)))?;
        sub.status = status;
        Ok(())
    }

    async fn advance_subscription(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Subscription {} not found", id)))?;
        sub.current_sequence += 1;
        sub.last_sent = Some(sent_at);
        Ok(())
    }

    async fn touch_last_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Subscription {} not found", id)))?;
        sub.last_sent = Some(sent_at);
        Ok(())
    }

    async fn activate_oldest_queued(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        let mut inner = self.inner.lock().unwrap();
        let oldest = inner
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Queued)
            .min_by_key(|s| s.created_at);
        Ok(oldest.map(|sub| {
            sub.status = SubscriptionStatus::Active;
            sub.current_sequence = 1;
            sub.last_sent = None;
            sub.clone()
        }))
    }

    async fn completed_books_for_user(&self, user_id: Uuid) -> PortResult<Vec<Book>> {
        let inner = self.inner.lock().unwrap();
        let completed: Vec<String> = inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Completed)
            .map(|s| s.book_id.clone())
            .collect();
        Ok(inner
            .books
            .iter()
            .filter(|b| completed.contains(&b.book_id))
            .cloned()
            .collect())
    }
}

//=========================================================================================
// FakeMailer
//=========================================================================================

/// Records sent mail; can be told to fail to exercise the no-mutation path.
#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub fail: Mutex<bool>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_body(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, body)| body.clone())
            .expect("at least one email sent")
    }

    pub fn last_subject(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, subject, _)| subject.clone())
            .expect("at least one email sent")
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> PortResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(PortError::Unexpected("mailer told to fail".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

//=========================================================================================
// FakeRecap
//=========================================================================================

/// Scripted `RecapService`: summaries echo their input; recommendations
/// return a preset list (empty by default, which exercises the random
/// fallback at call sites).
#[derive(Default)]
pub struct FakeRecap {
    pub recommendations: Mutex<Vec<String>>,
    pub summarize_calls: Mutex<u32>,
    pub fail_summaries: Mutex<bool>,
}

impl FakeRecap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_recommendations(&self, ids: Vec<String>) {
        *self.recommendations.lock().unwrap() = ids;
    }

    pub fn set_fail_summaries(&self, fail: bool) {
        *self.fail_summaries.lock().unwrap() = fail;
    }
}

#[async_trait]
impl RecapService for FakeRecap {
    async fn summarize(
        &self,
        current_text: &str,
        previous_recap: Option<&str>,
    ) -> PortResult<String> {
        *self.summarize_calls.lock().unwrap() += 1;
        if *self.fail_summaries.lock().unwrap() {
            return Err(PortError::RateLimited("scripted failure".to_string()));
        }
        match previous_recap {
            Some(prev) => Ok(format!("recap[{} | {}]", prev, &current_text[..current_text.len().min(20)])),
            None => Ok(format!("recap[{}]", &current_text[..current_text.len().min(20)])),
        }
    }

    async fn recommend(
        &self,
        _read_titles: &[String],
        _candidates: &[Book],
    ) -> PortResult<Vec<String>> {
        Ok(self.recommendations.lock().unwrap().clone())
    }
}
