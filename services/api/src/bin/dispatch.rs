//! services/api/src/bin/dispatch.rs
//!
//! The delivery cron entry point. Run with no arguments for a full sweep
//! (intended to fire once per hour), or with `--sub <uuid>` to force one
//! subscription through a manual dispatch cycle.

use api_lib::{
    adapters::{DbAdapter, OpenAiRecapAdapter, SendGridMailer},
    config::Config,
    dispatch::{DispatchEngine, Trigger},
    error::ApiError,
    security::{EmailCipher, TokenCodec},
};
use async_openai::{config::OpenAIConfig, Client};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn parse_args() -> Result<Option<Uuid>, ApiError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(None),
        [flag, raw] if flag == "--sub" => Uuid::parse_str(raw).map(Some).map_err(|_| {
            ApiError::InvalidInput(format!("'{}' is not a subscription uuid", raw))
        }),
        _ => Err(ApiError::InvalidInput(
            "usage: dispatch [--sub <uuid>]".to_string(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let forced_sub = parse_args()?;

    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    db_adapter.run_migrations().await?;

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

    let engine = DispatchEngine::new(
        db_adapter,
        recap_adapter,
        mailer,
        EmailCipher::new(&config.encryption_key),
        TokenCodec::new(&config.encryption_key),
        config.base_url.clone(),
        config.delivery_hour,
        config.binge_cooldown_minutes,
    );

    match forced_sub {
        Some(sub_id) => {
            info!(%sub_id, "forcing manual dispatch");
            let outcome = engine.dispatch_one(sub_id, Trigger::Manual, Utc::now()).await;
            println!("{}", outcome.message());
        }
        None => {
            let stats = engine.run_sweep(Utc::now()).await;
            println!(
                "sweep complete: {} sent, {} skipped, {} failed",
                stats.sent, stats.skipped, stats.failed
            );
        }
    }

    Ok(())
}
