//! services/api/src/bin/ingest.rs
//!
//! Catalog ingestion CLI.
//!
//! usage: ingest <source> [--title <title>] [--id <book id>] [--edition short|standard|long]
//!
//! The source can be a Gutenberg catalog number ("84"), a pg-id ("pg84"), or
//! a full URL to a plain-text file.

use api_lib::{
    adapters::DbAdapter,
    config::Config,
    error::ApiError,
    ingest::{derive_metadata, fetch_text, Ingestor},
};
use dailylit_core::domain::Edition;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    source: String,
    title: Option<String>,
    id: Option<String>,
    edition: Edition,
}

fn parse_args() -> Result<Args, ApiError> {
    let usage = "usage: ingest <source> [--title <title>] [--id <book id>] [--edition short|standard|long]";

    let mut source = None;
    let mut title = None;
    let mut id = None;
    let mut edition = Edition::Standard;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--title" | "-t" => {
                title = Some(args.next().ok_or_else(|| {
                    ApiError::InvalidInput(usage.to_string())
                })?);
            }
            "--id" | "-i" => {
                id = Some(args.next().ok_or_else(|| {
                    ApiError::InvalidInput(usage.to_string())
                })?);
            }
            "--edition" | "-e" => {
                let raw = args
                    .next()
                    .ok_or_else(|| ApiError::InvalidInput(usage.to_string()))?;
                edition = Edition::parse(&raw).ok_or_else(|| {
                    ApiError::InvalidInput(format!("unknown edition '{}'", raw))
                })?;
            }
            other if source.is_none() && !other.starts_with('-') => {
                source = Some(other.to_string());
            }
            _ => return Err(ApiError::InvalidInput(usage.to_string())),
        }
    }

    Ok(Args {
        source: source.ok_or_else(|| ApiError::InvalidInput(usage.to_string()))?,
        title,
        id,
        edition,
    })
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let args = parse_args()?;

    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (url, derived_id) = derive_metadata(&args.source)?;
    let bare_id = args.id.or(derived_id).ok_or_else(|| {
        ApiError::InvalidInput(
            "could not determine a book id from that URL; pass --id explicitly".to_string(),
        )
    })?;

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    db_adapter.run_migrations().await?;

    println!("Fetching: {}", url);
    let raw_text = fetch_text(&reqwest::Client::new(), &url).await?;

    let ingestor = Ingestor::new(db_adapter);
    let report = ingestor
        .ingest_text(
            &raw_text,
            &bare_id,
            Some(&url),
            args.title.as_deref(),
            args.edition,
        )
        .await?;

    println!(
        "Success! \"{}\" by {} is ready as '{}': {} daily parts.",
        report.title, report.author, report.book_id, report.total_chunks
    );
    Ok(())
}
