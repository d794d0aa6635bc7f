//! services/api/src/bin/backfill.rs
//!
//! Offline recap backfill. Safe to re-run at any time; only chunks with a
//! missing recap are touched.

use api_lib::{
    adapters::{DbAdapter, OpenAiRecapAdapter},
    backfill::BackfillRunner,
    config::Config,
    error::ApiError,
};
use async_openai::{config::OpenAIConfig, Client};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
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

    let runner = BackfillRunner::new(db_adapter, recap_adapter, config.backfill_workers);
    let stats = runner.run().await.map_err(ApiError::Port)?;

    println!(
        "backfill complete: {} books scanned, {} recaps written, {} failures",
        stats.books, stats.chunks_updated, stats.chunks_failed
    );
    Ok(())
}
