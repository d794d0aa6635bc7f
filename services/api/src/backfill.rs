//! services/api/src/backfill.rs
//!
//! Offline recap generation. Books run concurrently, chunks within a book
//! strictly in ascending sequence so each recap can fold in the one before
//! it. Re-running is safe: only NULL recaps are ever targeted.

use std::sync::Arc;

use dailylit_core::ports::{DatabaseService, PortResult, RecapService};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

/// Totals for one backfill run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
    pub books: usize,
    pub chunks_updated: usize,
    pub chunks_failed: usize,
}

pub struct BackfillRunner {
    db: Arc<dyn DatabaseService>,
    recap: Arc<dyn RecapService>,
    /// How many books generate at once.
    workers: usize,
}

impl BackfillRunner {
    pub fn new(db: Arc<dyn DatabaseService>, recap: Arc<dyn RecapService>, workers: usize) -> Self {
        Self {
            db,
            recap,
            workers: workers.max(1),
        }
    }

    /// Finds every book with missing recaps and fills them in.
    pub async fn run(&self) -> PortResult<BackfillStats> {
        let book_ids = self.db.books_missing_recaps().await?;
        info!(books = book_ids.len(), "starting recap backfill");

        let mut stats = BackfillStats {
            books: book_ids.len(),
            ..Default::default()
        };

        let mut results = stream::iter(book_ids)
            .map(|book_id| async move {
                let outcome = self.process_book(&book_id).await;
                (book_id, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((book_id, outcome)) = results.next().await {
            match outcome {
                Ok((updated, failed)) => {
                    stats.chunks_updated += updated;
                    stats.chunks_failed += failed;
                }
                Err(e) => {
                    // One broken book never stops the run.
                    warn!(%book_id, error = %e, "backfill failed for book");
                    stats.chunks_failed += 1;
                }
            }
        }

        info!(
            books = stats.books,
            updated = stats.chunks_updated,
            failed = stats.chunks_failed,
            "recap backfill complete"
        );
        Ok(stats)
    }

    /// One book, in order. Each recap summarizes the *previous* chunk's text,
    /// chained with that chunk's own recap when the chain is intact. A gap in
    /// the chain (or a generation failure) degrades to context-free summaries
    /// rather than stalling the book.
    async fn process_book(&self, book_id: &str) -> PortResult<(usize, usize)> {
        let pending = self.db.chunks_missing_recaps(book_id).await?;
        if pending.is_empty() {
            return Ok((0, 0));
        }
        info!(%book_id, chunks = pending.len(), "backfilling book");

        let mut updated = 0;
        let mut failed = 0;

        for chunk in pending {
            let prev = self.db.get_chunk(book_id, chunk.sequence - 1).await?;
            let (prev_content, prev_recap) = match prev {
                Some(p) => (p.content, p.recap),
                None => {
                    warn!(%book_id, sequence = chunk.sequence, "previous chunk missing, skipping");
                    failed += 1;
                    continue;
                }
            };

            match self
                .recap
                .summarize(&prev_content, prev_recap.as_deref())
                .await
            {
                Ok(summary) => {
                    self.db
                        .set_chunk_recap(book_id, chunk.sequence, &summary)
                        .await?;
                    updated += 1;
                }
                Err(e) => {
                    warn!(%book_id, sequence = chunk.sequence, error = %e, "recap generation failed");
                    failed += 1;
                }
            }
        }

        Ok((updated, failed))
    }
}
