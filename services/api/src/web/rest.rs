//! services/api/src/web/rest.rs
//!
//! Axum handlers for the public surface: the catalog, signup, and the
//! token-authenticated email-link endpoints (unsubscribe, binge, profile,
//! switch book). Email links carry signed tokens instead of sessions, so
//! none of these require login.

use crate::dispatch::{DispatchOutcome, Trigger};
use crate::security::TokenPurpose;
use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use chrono::Utc;
use dailylit_core::domain::{Edition, Subscription, SubscriptionStatus};
use dailylit_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

//=========================================================================================
// API Request/Response Types
//=========================================================================================

#[derive(Serialize)]
pub struct CatalogEntry {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub total_chunks: i32,
    pub blurb: Option<String>,
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub book_id: String,
    /// IANA zone name; defaults to UTC.
    pub timezone: Option<String>,
    /// Subscriber-local hour override for this subscription (0-23).
    pub delivery_hour: Option<i32>,
}

#[derive(Serialize)]
pub struct SignupResponse {
    pub subscription_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Deserialize)]
pub struct SwitchBookRequest {
    pub token: String,
    pub book_id: String,
}

#[derive(Serialize)]
pub struct DashboardSubscription {
    pub subscription_id: Uuid,
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub status: String,
    pub current_sequence: i32,
    pub total_chunks: i32,
    pub progress_pct: i64,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub user_id: Uuid,
    pub timezone: String,
    pub claimed: bool,
    pub username: Option<String>,
    /// Authorizes POST /switch_book for this user.
    pub switch_token: String,
    pub subscriptions: Vec<DashboardSubscription>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET / - The book catalog (standard editions only).
pub async fn catalog_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let books = state.db.list_books().await.map_err(|e| {
        error!("Failed to list books: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load the catalog".to_string(),
        )
    })?;

    let catalog: Vec<CatalogEntry> = books
        .into_iter()
        .filter(|b| b.edition == Edition::Standard)
        .map(|b| CatalogEntry {
            book_id: b.book_id,
            title: b.title,
            author: b.author,
            total_chunks: b.total_chunks,
            blurb: b.blurb,
        })
        .collect();

    Ok(Json(catalog))
}

/// POST /signup - Subscribe an email address to a book.
///
/// A known email reuses its existing identity; the first book goes out
/// immediately (active) and later ones wait their turn (queued, FIFO).
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !req.email.contains('@') {
        return Err((
            StatusCode::BAD_REQUEST,
            "Please enter a valid email address".to_string(),
        ));
    }
    if let Some(hour) = req.delivery_hour {
        if !(0..24).contains(&hour) {
            return Err((
                StatusCode::BAD_REQUEST,
                "Delivery hour must be between 0 and 23".to_string(),
            ));
        }
    }

    let book = state
        .db
        .get_book(&req.book_id)
        .await
        .map_err(internal("Failed to look up the book"))?
        .ok_or((
            StatusCode::NOT_FOUND,
            "We don't have that book in the library".to_string(),
        ))?;

    let timezone = req.timezone.as_deref().unwrap_or("UTC");
    let user = match state.users.create(&req.email, timezone).await {
        Ok(user) => user,
        Err(PortError::Duplicate(_)) => {
            let user = state
                .users
                .find_by_email(&req.email)
                .await
                .map_err(internal("Failed to look up the subscriber"))?
                .ok_or((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to look up the subscriber".to_string(),
                ))?;
            // A returning subscriber can correct their timezone by signing
            // up again with a different one.
            if let Some(tz) = req.timezone.as_deref() {
                if tz != user.timezone {
                    state
                        .db
                        .set_user_timezone(user.id, tz)
                        .await
                        .map_err(internal("Failed to update the timezone"))?;
                }
            }
            user
        }
        Err(e) => {
            error!("Failed to create user: {:?}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signup failed, please try again".to_string(),
            ));
        }
    };

    let has_active = state
        .db
        .subscriptions_for_user(user.id)
        .await
        .map_err(internal("Failed to check existing subscriptions"))?
        .iter()
        .any(|s| s.status == SubscriptionStatus::Active);

    let status = if has_active {
        SubscriptionStatus::Queued
    } else {
        SubscriptionStatus::Active
    };

    if let Some(existing) = state
        .db
        .find_subscription(user.id, &book.book_id)
        .await
        .map_err(internal("Failed to check existing subscriptions"))?
    {
        // Unsubscribed rows are revived where the reader left off, as the
        // unsubscribe page promises. Anything else is a real conflict.
        if existing.status != SubscriptionStatus::Unsubscribed {
            return Err((
                StatusCode::CONFLICT,
                format!(
                    "This email is already subscribed to that book (status: {})",
                    existing.status.as_str()
                ),
            ));
        }
        state
            .db
            .set_subscription_status(existing.id, status)
            .await
            .map_err(internal("Failed to restore the subscription"))?;
        return Ok((
            StatusCode::CREATED,
            Json(SignupResponse {
                subscription_id: existing.id,
                status: status.as_str().to_string(),
                message: signup_message(status, &book.title),
            }),
        ));
    }

    let sub = Subscription {
        id: Uuid::new_v4(),
        user_id: user.id,
        book_id: book.book_id.clone(),
        current_sequence: 1,
        status,
        created_at: Utc::now(),
        last_sent: None,
        delivery_hour: req.delivery_hour,
    };
    state
        .db
        .insert_subscription(&sub)
        .await
        .map_err(internal("Failed to create the subscription"))?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            subscription_id: sub.id,
            status: status.as_str().to_string(),
            message: signup_message(status, &book.title),
        }),
    ))
}

fn signup_message(status: SubscriptionStatus, title: &str) -> String {
    match status {
        SubscriptionStatus::Active => format!(
            "You're in! Your first part of \"{}\" arrives at the next delivery hour.",
            title
        ),
        _ => format!(
            "\"{}\" is queued and will start as soon as your current book is finished.",
            title
        ),
    }
}

/// GET /unsubscribe?token= - One-click unsubscribe from an email link.
pub async fn unsubscribe_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let sub_id = verify_uuid_token(&state, &query.token, TokenPurpose::Unsubscribe)?;

    state
        .db
        .set_subscription_status(sub_id, SubscriptionStatus::Unsubscribed)
        .await
        .map_err(|e| {
            error!("Failed to unsubscribe {}: {:?}", sub_id, e);
            html_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong on our end. Please try the link again.",
            )
        })?;

    Ok(Html(page(
        "Unsubscribed",
        "You won't receive any more parts of this book. \
         Sign up again any time you miss it.",
    )))
}

/// GET /next?token= - The "read the next part now" email link.
pub async fn next_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let sub_id = verify_uuid_token(&state, &query.token, TokenPurpose::Binge)?;

    match state
        .dispatch
        .dispatch_one(sub_id, Trigger::Manual, Utc::now())
        .await
    {
        DispatchOutcome::Sent(msg) => Ok(Html(page("On its way!", &msg))),
        DispatchOutcome::Skipped(reason) => Ok(Html(page("Not just yet", &reason))),
        DispatchOutcome::Failed(reason) => {
            error!("Manual dispatch of {} failed: {}", sub_id, reason);
            Err(html_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "We couldn't send your next part. Please try again in a few minutes.",
            ))
        }
    }
}

/// GET /profile?token= - The dashboard behind the mailed profile link.
pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let user_id = state
        .tokens
        .verify(&query.token, TokenPurpose::Profile)
        .and_then(|s| Uuid::parse_str(&s).ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "This link is invalid or damaged".to_string(),
        ))?;

    let dashboard = build_dashboard(&state, user_id)
        .await
        .map_err(internal("Failed to load the dashboard"))?;
    Ok(Json(dashboard))
}

/// POST /switch_book - Jump the queue: make one of the user's queued or
/// paused subscriptions the active one, parking the current book.
pub async fn switch_book_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwitchBookRequest>,
) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let user_id = state
        .tokens
        .verify(&req.token, TokenPurpose::SwitchBook)
        .and_then(|s| Uuid::parse_str(&s).ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "This link is invalid or damaged".to_string(),
        ))?;

    let subs = state
        .db
        .subscriptions_for_user(user_id)
        .await
        .map_err(internal("Failed to load subscriptions"))?;

    let target = subs
        .iter()
        .find(|s| {
            s.book_id == req.book_id
                && matches!(
                    s.status,
                    SubscriptionStatus::Queued | SubscriptionStatus::Paused
                )
        })
        .ok_or((
            StatusCode::NOT_FOUND,
            "No waiting subscription for that book".to_string(),
        ))?;

    // Park the current book first so the user never has two live streams.
    if let Some(active) = subs
        .iter()
        .find(|s| s.status == SubscriptionStatus::Active)
    {
        state
            .db
            .set_subscription_status(active.id, SubscriptionStatus::Queued)
            .await
            .map_err(internal("Failed to switch books"))?;
    }

    state
        .db
        .set_subscription_status(target.id, SubscriptionStatus::Active)
        .await
        .map_err(internal("Failed to switch books"))?;

    let dashboard = build_dashboard(&state, user_id)
        .await
        .map_err(internal("Failed to load the dashboard"))?;
    Ok(Json(dashboard))
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Builds the dashboard payload shared by the profile link and login.
pub async fn build_dashboard(
    state: &AppState,
    user_id: Uuid,
) -> Result<DashboardResponse, PortError> {
    let user = state.db.get_user_by_id(user_id).await?;
    let subs = state.db.subscriptions_for_user(user_id).await?;

    let mut subscriptions = Vec::with_capacity(subs.len());
    for sub in subs {
        let book = match state.db.get_book(&sub.book_id).await? {
            Some(book) => book,
            None => continue,
        };
        let total = book.total_chunks.max(1) as i64;
        let read = (sub.current_sequence as i64 - 1).clamp(0, total);
        subscriptions.push(DashboardSubscription {
            subscription_id: sub.id,
            book_id: book.book_id,
            title: book.title,
            author: book.author,
            status: sub.status.as_str().to_string(),
            current_sequence: sub.current_sequence,
            total_chunks: book.total_chunks,
            progress_pct: 100 * read / total,
        });
    }

    Ok(DashboardResponse {
        user_id: user.id,
        timezone: user.timezone,
        claimed: user.claimed,
        username: user.username,
        switch_token: state
            .tokens
            .issue(&user_id.to_string(), TokenPurpose::SwitchBook),
        subscriptions,
    })
}

fn verify_uuid_token(
    state: &AppState,
    token: &str,
    purpose: TokenPurpose,
) -> Result<Uuid, (StatusCode, Html<String>)> {
    state
        .tokens
        .verify(token, purpose)
        .and_then(|s| Uuid::parse_str(&s).ok())
        .ok_or_else(|| {
            html_error(
                StatusCode::BAD_REQUEST,
                "This link is invalid or damaged. Check that your mail client \
                 didn't cut it short.",
            )
        })
}

fn internal<E: std::fmt::Debug>(msg: &'static str) -> impl Fn(E) -> (StatusCode, String) {
    move |e| {
        error!("{}: {:?}", msg, e);
        (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string())
    }
}

fn page(heading: &str, body: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: Georgia, serif; max-width: 600px; margin: 40px auto; color: #333;">
    <h2>{}</h2>
    <p>{}</p>
</body>
</html>"#,
        heading, body
    )
}

fn html_error(status: StatusCode, body: &str) -> (StatusCode, Html<String>) {
    (status, Html(page("Hmm, that didn't work", body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::DispatchEngine;
    use crate::security::{EmailCipher, TokenCodec};
    use crate::testsupport::{FakeDb, FakeMailer, FakeRecap};
    use crate::users::UserService;
    use dailylit_core::domain::Book;
    use dailylit_core::ports::DatabaseService;

    const SECRET: &str = "rest-test-secret";

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:3000".parse().unwrap(),
            database_url: "postgres://localhost/unused".to_string(),
            log_level: tracing::Level::INFO,
            encryption_key: SECRET.to_string(),
            base_url: "https://example.com".to_string(),
            from_email: "hello@example.com".to_string(),
            sendgrid_api_key: None,
            openai_api_key: None,
            recap_model: "test-model".to_string(),
            delivery_hour: 6,
            binge_cooldown_minutes: 5,
            backfill_workers: 1,
        }
    }

    fn app() -> (Arc<AppState>, Arc<FakeDb>) {
        let db = Arc::new(FakeDb::new());
        let mailer = Arc::new(FakeMailer::new());
        let cipher = EmailCipher::new(SECRET);
        let tokens = TokenCodec::new(SECRET);
        let dispatch = DispatchEngine::new(
            db.clone(),
            Arc::new(FakeRecap::new()),
            mailer,
            cipher.clone(),
            tokens.clone(),
            "https://example.com".to_string(),
            6,
            5,
        );
        let state = Arc::new(AppState {
            db: db.clone(),
            config: Arc::new(test_config()),
            users: UserService::new(db.clone(), cipher),
            dispatch,
            tokens,
        });
        (state, db)
    }

    fn seed_book(db: &FakeDb, id: &str, title: &str) {
        db.seed_book(Book {
            book_id: id.to_string(),
            parent_id: id.to_string(),
            title: title.to_string(),
            author: "Author".to_string(),
            total_chunks: 3,
            source_url: None,
            edition: Edition::Standard,
            chunk_words: 1000,
            cover_path: None,
            blurb: None,
        });
    }

    fn request(email: &str, book_id: &str, timezone: Option<&str>) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            book_id: book_id.to_string(),
            timezone: timezone.map(str::to_string),
            delivery_hour: None,
        }
    }

    /// Drives the signup handler and decodes its JSON body.
    async fn signup(
        state: &Arc<AppState>,
        req: SignupRequest,
    ) -> Result<(StatusCode, serde_json::Value), (StatusCode, String)> {
        let resp = signup_handler(State(state.clone()), Json(req))
            .await?
            .into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        Ok((status, serde_json::from_slice(&bytes).unwrap()))
    }

    fn sub_id(body: &serde_json::Value) -> Uuid {
        Uuid::parse_str(body["subscription_id"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn signup_activates_the_first_book_and_queues_the_second() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");
        seed_book(&db, "pg1342", "Pride and Prejudice");

        let (status, body) = signup(&state, request("reader@example.com", "pg84", Some("UTC")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "active");

        let (status, body) = signup(&state, request("reader@example.com", "pg1342", None))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "queued");

        // Both subscriptions hang off the one identity.
        let user = state
            .users
            .find_by_email("reader@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(db.subscriptions_for_user(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn signup_rejects_an_unknown_book() {
        let (state, _db) = app();
        let err = signup(&state, request("reader@example.com", "pg999", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signup_conflicts_on_a_live_duplicate_subscription() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");

        signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap();
        let err = signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn signup_updates_the_timezone_for_a_returning_reader() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");
        seed_book(&db, "pg1342", "Pride and Prejudice");
        seed_book(&db, "pg345", "Dracula");

        signup(&state, request("reader@example.com", "pg84", Some("UTC")))
            .await
            .unwrap();
        signup(
            &state,
            request("reader@example.com", "pg1342", Some("Europe/Paris")),
        )
        .await
        .unwrap();

        let user = state
            .users
            .find_by_email("reader@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.timezone, "Europe/Paris");

        // Omitting the zone leaves the stored one alone.
        signup(&state, request("reader@example.com", "pg345", None))
            .await
            .unwrap();
        let user = db.get_user_by_id(user.id).await.unwrap();
        assert_eq!(user.timezone, "Europe/Paris");
    }

    #[tokio::test]
    async fn unsubscribe_link_parks_the_subscription_and_rejects_tampering() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");
        let (_, body) = signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap();
        let id = sub_id(&body);

        // A token minted for a different purpose must not unsubscribe.
        let wrong = state.tokens.issue(&id.to_string(), TokenPurpose::Binge);
        let err = unsubscribe_handler(State(state.clone()), Query(TokenQuery { token: wrong }))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(db.subscription(id).status, SubscriptionStatus::Active);

        let token = state.tokens.issue(&id.to_string(), TokenPurpose::Unsubscribe);
        unsubscribe_handler(State(state.clone()), Query(TokenQuery { token }))
            .await
            .unwrap();
        assert_eq!(db.subscription(id).status, SubscriptionStatus::Unsubscribed);
    }

    #[tokio::test]
    async fn resubscribing_after_unsubscribe_revives_the_old_row() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");
        let (_, body) = signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap();
        let id = sub_id(&body);
        db.set_subscription_status(id, SubscriptionStatus::Unsubscribed)
            .await
            .unwrap();

        let (status, body) = signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "active");
        assert_eq!(sub_id(&body), id);
        assert_eq!(db.subscription(id).status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn switch_book_promotes_a_queued_subscription() {
        let (state, db) = app();
        seed_book(&db, "pg84", "Frankenstein");
        seed_book(&db, "pg1342", "Pride and Prejudice");

        let (_, body) = signup(&state, request("reader@example.com", "pg84", None))
            .await
            .unwrap();
        let active_id = sub_id(&body);
        let (_, body) = signup(&state, request("reader@example.com", "pg1342", None))
            .await
            .unwrap();
        let queued_id = sub_id(&body);

        let user = state
            .users
            .find_by_email("reader@example.com")
            .await
            .unwrap()
            .unwrap();
        let token = state
            .tokens
            .issue(&user.id.to_string(), TokenPurpose::SwitchBook);

        let Json(dashboard) = switch_book_handler(
            State(state.clone()),
            Json(SwitchBookRequest {
                token,
                book_id: "pg1342".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(db.subscription(queued_id).status, SubscriptionStatus::Active);
        assert_eq!(db.subscription(active_id).status, SubscriptionStatus::Queued);
        assert_eq!(dashboard.subscriptions.len(), 2);
    }
}
