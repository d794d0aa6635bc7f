//! services/api/src/render.rs
//!
//! HTML bodies for outgoing mail: the daily chunk and the completion
//! ("victory") message. Plain string templates, book-like styling.

use dailylit_core::domain::Book;

/// Everything the chunk template needs; filled in by the dispatch engine.
pub struct ChunkEmail<'a> {
    pub title: &'a str,
    pub sequence: i32,
    pub content: &'a str,
    /// "Previously on" box; only rendered when present (never for part 1).
    pub recap: Option<&'a str>,
    /// 1-100, already floored at 1 so the bar always shows a sliver.
    pub progress_pct: i64,
    pub base_url: &'a str,
    pub unsub_token: &'a str,
    pub binge_token: &'a str,
    pub profile_token: &'a str,
}

/// Everything the victory template needs.
pub struct VictoryEmail<'a> {
    pub title: &'a str,
    pub days_taken: i64,
    pub total_words: i64,
    pub recommendations: &'a [Book],
    /// The queued book activated by this completion, if any.
    pub next_book: Option<&'a Book>,
    pub base_url: &'a str,
    pub profile_token: &'a str,
}

/// Converts the stored plain text into paragraph-broken HTML.
fn text_to_html(content: &str) -> String {
    content.replace("\n\n", "</p><p>").replace('\n', "<br>")
}

/// Wraps the raw chunk text in a simple, book-like HTML template with the
/// recap box, progress bar and action links.
pub fn chunk_email(email: &ChunkEmail<'_>) -> String {
    let unsub_link = format!("{}/unsubscribe?token={}", email.base_url, email.unsub_token);
    let binge_link = format!("{}/next?token={}", email.base_url, email.binge_token);
    let profile_link = format!("{}/profile?token={}", email.base_url, email.profile_token);

    let recap_block = match email.recap {
        Some(recap) => format!(
            r#"<div style="background: #f7f4ed; border-left: 4px solid #c0a86e; padding: 12px 16px; margin-bottom: 20px; font-style: italic; color: #555;">
            <strong>Previously:</strong> {}
        </div>"#,
            recap
        ),
        None => String::new(),
    };

    format!(
        r#"<html>
<body style="font-family: Georgia, 'Times New Roman', serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #2c3e50; border-bottom: 2px solid #eee; padding-bottom: 10px;">
        {title}
    </h2>
    {recap_block}
    <div style="font-size: 18px;">
        <p>{body}</p>
    </div>
    <div style="background: #eee; border-radius: 4px; margin-top: 30px;">
        <div style="background: #c0a86e; width: {progress}%; height: 6px; border-radius: 4px;"></div>
    </div>
    <p style="font-size: 12px; color: #999; text-align: center;">
        DailyLit - Part {sequence} ({progress}% read) |
        <a href="{binge}" style="color: #999;">Read the next part now</a> |
        <a href="{profile}" style="color: #999;">Manage</a> |
        <a href="{unsub}" style="color: #999;">Unsubscribe</a>
    </p>
</body>
</html>"#,
        title = email.title,
        recap_block = recap_block,
        body = text_to_html(email.content),
        progress = email.progress_pct,
        sequence = email.sequence,
        binge = binge_link,
        profile = profile_link,
        unsub = unsub_link,
    )
}

/// The completion message: reading stats, the next queued book when one was
/// activated, and three recommendations.
pub fn victory_email(email: &VictoryEmail<'_>) -> String {
    let profile_link = format!("{}/profile?token={}", email.base_url, email.profile_token);

    let next_block = match email.next_book {
        Some(book) => format!(
            r#"<p>Up next from your queue: <strong>{}</strong> by {}. Your first part arrives tomorrow.</p>"#,
            book.title, book.author
        ),
        None => String::new(),
    };

    let mut rec_items = String::new();
    for book in email.recommendations {
        rec_items.push_str(&format!(
            "<li><strong>{}</strong> by {}</li>\n",
            book.title, book.author
        ));
    }

    format!(
        r#"<html>
<body style="font-family: Georgia, 'Times New Roman', serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #2c3e50; border-bottom: 2px solid #eee; padding-bottom: 10px;">
        You finished {title}!
    </h2>
    <p>You read the whole book - {words} words over {days} days.</p>
    {next_block}
    <p>Some books we think you would enjoy next:</p>
    <ul>
        {recs}
    </ul>
    <p style="font-size: 12px; color: #999; text-align: center;">
        DailyLit | <a href="{profile}" style="color: #999;">Choose your next book</a>
    </p>
</body>
</html>"#,
        title = email.title,
        words = email.total_words,
        days = email.days_taken,
        next_block = next_block,
        recs = rec_items,
        profile = profile_link,
    )
}
