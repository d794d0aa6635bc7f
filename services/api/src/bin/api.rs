//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiRecapAdapter, SendGridMailer},
    config::Config,
    dispatch::DispatchEngine,
    error::ApiError,
    security::{EmailCipher, TokenCodec},
    users::UserService,
    web::{
        auth::{claim_handler, login_handler},
        catalog_handler, next_handler, profile_handler, signup_handler, switch_book_handler,
        unsubscribe_handler, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let recap_adapter = Arc::new(OpenAiRecapAdapter::new(
        Client::with_config(openai_config),
        config.recap_model.clone(),
    ));

    let sendgrid_key = config
        .sendgrid_api_key
        .clone()
        .ok_or_else(|| ApiError::Internal("SENDGRID_API_KEY is required".to_string()))?;
    let mailer = Arc::new(SendGridMailer::new(
        reqwest::Client::new(),
        sendgrid_key,
        config.from_email.clone(),
    ));

    let cipher = EmailCipher::new(&config.encryption_key);
    let tokens = TokenCodec::new(&config.encryption_key);

    let dispatch = DispatchEngine::new(
        db_adapter.clone(),
        recap_adapter,
        mailer,
        cipher.clone(),
        tokens.clone(),
        config.base_url.clone(),
        config.delivery_hour,
        config.binge_cooldown_minutes,
    );

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter.clone(),
        config: config.clone(),
        users: UserService::new(db_adapter, cipher),
        dispatch,
        tokens,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .route("/", get(catalog_handler))
        .route("/signup", post(signup_handler))
        .route("/unsubscribe", get(unsubscribe_handler))
        .route("/next", get(next_handler))
        .route("/profile", get(profile_handler))
        .route("/switch_book", post(switch_book_handler))
        .route("/auth/claim", post(claim_handler))
        .route("/auth/login", post(login_handler))
        .layer(cors)
        .with_state(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
