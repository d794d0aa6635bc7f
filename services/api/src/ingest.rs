//! services/api/src/ingest.rs
//!
//! Project Gutenberg ingestion: resolve a source string to a download URL and
//! book id, strip the Gutenberg boilerplate, and slice the body into
//! delivery-sized chunks by paragraph accumulation.

use std::sync::{Arc, OnceLock};

use dailylit_core::domain::{Book, Chunk, Edition};
use dailylit_core::ports::DatabaseService;
use regex::{Regex, RegexBuilder};
use tracing::info;

use crate::error::ApiError;

const START_MARKERS: &[&str] = &[
    r"\*\*\* START OF (THE|THIS) PROJECT GUTENBERG EBOOK .* \*\*\*",
    r"\*\*\* START OF THE PROJECT GUTENBERG EBOOK",
    r"START OF THE PROJECT GUTENBERG EBOOK",
];

const END_MARKERS: &[&str] = &[
    r"\*\*\* END OF (THE|THIS) PROJECT GUTENBERG EBOOK .* \*\*\*",
    r"\*\*\* END OF THE PROJECT GUTENBERG EBOOK",
    r"End of the Project Gutenberg EBook",
];

fn url_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/pg(\d+)\.txt").expect("static pattern"))
}

fn header_field_re(field: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| {
        RegexBuilder::new(&format!(r"^{}:\s+(.+)$", field))
            .multi_line(true)
            .build()
            .expect("static pattern")
    })
}

/// What one successful ingestion produced.
#[derive(Debug)]
pub struct IngestReport {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub total_chunks: usize,
}

/// Resolves an operator-supplied source into `(download_url, bare_book_id)`.
///
/// Accepts a full URL, a bare catalog number ("84") or a pg-id ("pg84"). For
/// URLs whose filename does not match the usual `pgNN.txt` shape the id comes
/// back `None` and the caller must supply one explicitly.
pub fn derive_metadata(source: &str) -> Result<(String, Option<String>), ApiError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let book_id = url_id_re()
            .captures(source)
            .map(|c| format!("pg{}", &c[1]));
        return Ok((source.to_string(), book_id));
    }

    let clean_id = source.to_lowercase().replace("pg", "");
    if !clean_id.is_empty() && clean_id.chars().all(|c| c.is_ascii_digit()) {
        let url = format!(
            "https://www.gutenberg.org/cache/epub/{id}/pg{id}.txt",
            id = clean_id
        );
        return Ok((url, Some(format!("pg{}", clean_id))));
    }

    Err(ApiError::InvalidInput(format!(
        "could not interpret source '{}'; expected a URL or a Gutenberg id",
        source
    )))
}

/// Scrapes the `Title:` line from the Gutenberg header.
pub fn extract_title(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    header_field_re("Title", &RE)
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

/// Scrapes the `Author:` line from the Gutenberg header.
pub fn extract_author(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    header_field_re("Author", &RE)
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

/// Cuts the text down to everything between the Gutenberg start and end
/// markers. Missing markers degrade gracefully to the text edge.
pub fn clean_text(text: &str) -> String {
    let mut start_pos = 0;
    for marker in START_MARKERS {
        let re = RegexBuilder::new(marker)
            .case_insensitive(true)
            .build()
            .expect("static pattern");
        if let Some(m) = re.find(text) {
            start_pos = m.end();
            break;
        }
    }

    let mut end_pos = text.len();
    for marker in END_MARKERS {
        let re = RegexBuilder::new(marker)
            .case_insensitive(true)
            .build()
            .expect("static pattern");
        if let Some(m) = re.find(text) {
            end_pos = m.start();
            break;
        }
    }

    if end_pos < start_pos {
        end_pos = text.len();
    }
    text[start_pos..end_pos].trim().to_string()
}

/// The edition-qualified id: standard editions keep the bare id, the others
/// get a suffix. `parent_id` always stays the bare id so editions of one work
/// can be grouped.
pub fn edition_book_id(bare_id: &str, edition: Edition) -> String {
    match edition {
        Edition::Standard => bare_id.to_string(),
        Edition::Short => format!("{}_short", bare_id),
        Edition::Long => format!("{}_long", bare_id),
    }
}

/// Splits cleaned text into chunks of whole paragraphs, closing a chunk when
/// the next paragraph would push it past `target_words`. A single oversized
/// paragraph still becomes its own chunk rather than being split mid-thought.
pub fn build_chunks(book_id: &str, text: &str, target_words: i32) -> Vec<Chunk> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words: i32 = 0;

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let words = para.split_whitespace().count() as i32;

        if current_words + words > target_words && !current.is_empty() {
            chunks.push(Chunk {
                book_id: book_id.to_string(),
                sequence: chunks.len() as i32 + 1,
                content: current.join("\n\n"),
                word_count: current_words,
                recap: None,
            });
            current.clear();
            current_words = 0;
        }

        current.push(para);
        current_words += words;
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            book_id: book_id.to_string(),
            sequence: chunks.len() as i32 + 1,
            content: current.join("\n\n"),
            word_count: current_words,
            recap: None,
        });
    }

    chunks
}

/// Downloads raw book text. Gutenberg serves UTF-8 with an occasional BOM.
pub async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String, ApiError> {
    let text = http
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::Internal(format!("download failed: {}", e)))?
        .error_for_status()
        .map_err(|e| ApiError::Internal(format!("download failed: {}", e)))?
        .text()
        .await
        .map_err(|e| ApiError::Internal(format!("download failed: {}", e)))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Turns already-downloaded raw text into a catalog entry plus its chunks.
pub struct Ingestor {
    db: Arc<dyn DatabaseService>,
}

impl Ingestor {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn ingest_text(
        &self,
        raw_text: &str,
        bare_id: &str,
        source_url: Option<&str>,
        title_override: Option<&str>,
        edition: Edition,
    ) -> Result<IngestReport, ApiError> {
        let title = title_override
            .map(str::to_string)
            .or_else(|| extract_title(raw_text))
            .unwrap_or_else(|| "Unknown Title".to_string());
        let author = extract_author(raw_text).unwrap_or_else(|| "Unknown".to_string());

        let book_id = edition_book_id(bare_id, edition);
        if self.db.get_book(&book_id).await?.is_some() {
            return Err(ApiError::Port(
                dailylit_core::ports::PortError::Duplicate(format!(
                    "book id '{}' already exists in the library",
                    book_id
                )),
            ));
        }

        let body = clean_text(raw_text);
        let target = edition.target_words();
        let chunks = build_chunks(&book_id, &body, target);
        if chunks.is_empty() {
            return Err(ApiError::InvalidInput(
                "no text left after stripping boilerplate".to_string(),
            ));
        }

        info!(%book_id, %title, chunks = chunks.len(), "ingesting book");

        // The book row must exist before its chunks (foreign key).
        self.db
            .insert_book(&Book {
                book_id: book_id.clone(),
                parent_id: bare_id.to_string(),
                title: title.clone(),
                author: author.clone(),
                total_chunks: chunks.len() as i32,
                source_url: source_url.map(str::to_string),
                edition,
                chunk_words: target,
                cover_path: None,
                blurb: None,
            })
            .await?;
        self.db.insert_chunks(&chunks).await?;

        Ok(IngestReport {
            book_id,
            title,
            author,
            total_chunks: chunks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::FakeDb;
    use dailylit_core::ports::PortError;

    const SAMPLE: &str = "\
The Project Gutenberg eBook of Frankenstein

Title: Frankenstein; Or, The Modern Prometheus

Author: Mary Wollstonecraft Shelley

*** START OF THE PROJECT GUTENBERG EBOOK FRANKENSTEIN ***

Letter 1

You will rejoice to hear that no disaster has accompanied the
commencement of an enterprise.

I am already far north of London.

*** END OF THE PROJECT GUTENBERG EBOOK FRANKENSTEIN ***

Donations are gratefully accepted.";

    #[test]
    fn derives_url_and_id_from_every_source_shape() {
        let (url, id) =
            derive_metadata("https://www.gutenberg.org/cache/epub/84/pg84.txt").unwrap();
        assert_eq!(url, "https://www.gutenberg.org/cache/epub/84/pg84.txt");
        assert_eq!(id.as_deref(), Some("pg84"));

        let (url, id) = derive_metadata("84").unwrap();
        assert_eq!(url, "https://www.gutenberg.org/cache/epub/84/pg84.txt");
        assert_eq!(id.as_deref(), Some("pg84"));

        let (_, id) = derive_metadata("pg84").unwrap();
        assert_eq!(id.as_deref(), Some("pg84"));

        // A URL without the usual filename shape yields no id.
        let (_, id) = derive_metadata("https://example.com/books/frankenstein.txt").unwrap();
        assert_eq!(id, None);

        assert!(matches!(
            derive_metadata("not-a-book"),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[test]
    fn scrapes_title_and_author_from_the_header() {
        assert_eq!(
            extract_title(SAMPLE).as_deref(),
            Some("Frankenstein; Or, The Modern Prometheus")
        );
        assert_eq!(
            extract_author(SAMPLE).as_deref(),
            Some("Mary Wollstonecraft Shelley")
        );
        assert_eq!(extract_title("no header here"), None);
    }

    #[test]
    fn strips_boilerplate_outside_the_markers() {
        let body = clean_text(SAMPLE);
        assert!(body.starts_with("Letter 1"));
        assert!(body.ends_with("far north of London."));
        assert!(!body.contains("Donations"));
        assert!(!body.contains("Title:"));
    }

    #[test]
    fn clean_text_without_markers_keeps_everything() {
        let body = clean_text("Just a plain text.\n\nNothing else.");
        assert_eq!(body, "Just a plain text.\n\nNothing else.");
    }

    #[test]
    fn chunks_respect_the_word_target_and_keep_paragraphs_whole() {
        // Five 6-word paragraphs against a 13-word target: two fit per chunk,
        // the third would overflow and starts the next one.
        let text = (0..5)
            .map(|i| format!("para {} has six words total.", i))
            .collect::<Vec<_>>()
            .join("\n\n");

        let chunks = build_chunks("pg1", &text, 13);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].word_count, 12);
        assert!(chunks[0].content.contains("para 1"));
        assert!(!chunks[0].content.contains("para 2"));
        assert_eq!(chunks[2].sequence, 3);
        assert_eq!(chunks[2].word_count, 6);
        // Paragraph boundaries survive inside a chunk.
        for chunk in &chunks {
            assert!(!chunk.content.starts_with('\n'));
        }
    }

    #[test]
    fn oversized_paragraph_becomes_its_own_chunk() {
        let long_para = vec!["word"; 50].join(" ");
        let text = format!("short one.\n\n{}\n\nanother short.", long_para);
        let chunks = build_chunks("pg1", &text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].word_count, 50);
    }

    #[test]
    fn windows_line_endings_are_normalized() {
        let chunks = build_chunks("pg1", "one two.\r\n\r\nthree four.", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "one two.\n\nthree four.");
        assert_eq!(chunks[0].word_count, 4);
    }

    #[test]
    fn edition_suffixing() {
        assert_eq!(edition_book_id("pg84", Edition::Standard), "pg84");
        assert_eq!(edition_book_id("pg84", Edition::Short), "pg84_short");
        assert_eq!(edition_book_id("pg84", Edition::Long), "pg84_long");
    }

    #[tokio::test]
    async fn ingest_text_stores_chunks_and_the_book_row() {
        let db = Arc::new(FakeDb::new());
        let ingestor = Ingestor::new(db.clone());

        let report = ingestor
            .ingest_text(SAMPLE, "pg84", Some("https://example.com/pg84.txt"), None, Edition::Standard)
            .await
            .unwrap();

        assert_eq!(report.book_id, "pg84");
        assert_eq!(report.title, "Frankenstein; Or, The Modern Prometheus");
        assert_eq!(report.total_chunks, 1);

        let book = db.get_book("pg84").await.unwrap().unwrap();
        assert_eq!(book.parent_id, "pg84");
        assert_eq!(book.total_chunks, 1);
        assert_eq!(book.chunk_words, 1000);
        let chunk = db.get_chunk("pg84", 1).await.unwrap().unwrap();
        assert!(chunk.content.starts_with("Letter 1"));
        assert!(chunk.recap.is_none());
    }

    #[tokio::test]
    async fn ingest_rejects_duplicate_book_ids() {
        let db = Arc::new(FakeDb::new());
        let ingestor = Ingestor::new(db.clone());

        ingestor
            .ingest_text(SAMPLE, "pg84", None, None, Edition::Standard)
            .await
            .unwrap();
        let err = ingestor
            .ingest_text(SAMPLE, "pg84", None, None, Edition::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Port(PortError::Duplicate(_))));

        // A different edition of the same work is a new catalog row.
        let report = ingestor
            .ingest_text(SAMPLE, "pg84", None, None, Edition::Short)
            .await
            .unwrap();
        assert_eq!(report.book_id, "pg84_short");
        let short = db.get_book("pg84_short").await.unwrap().unwrap();
        assert_eq!(short.parent_id, "pg84");
        assert_eq!(short.chunk_words, 500);
    }

    #[tokio::test]
    async fn title_override_wins_over_the_header() {
        let db = Arc::new(FakeDb::new());
        let ingestor = Ingestor::new(db.clone());

        let report = ingestor
            .ingest_text(SAMPLE, "pg84", None, Some("Frankenstein"), Edition::Standard)
            .await
            .unwrap();
        assert_eq!(report.title, "Frankenstein");
    }
}
