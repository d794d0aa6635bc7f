//! services/api/src/adapters/recap_llm.rs
//!
//! This module contains the adapter for the recap/recommendation LLM.
//! It implements the `RecapService` port from the `core` crate.

const FIRST_CHUNK_PROMPT: &str = r#"You are a literary assistant analyzing a classic public domain novel.
Summarize the following opening book excerpt in 2-3 sentences.
Focus on identifying the main characters and the setting. Use specific names.

CONTEXT: This is a fictional story (Public Domain). Do not censor literary themes.

TEXT:
{text}"#;

const CONTINUATION_PROMPT: &str = r#"You are writing a 'Previously On' recap for a serialized novel.

CONTEXT: This is a fictional story (Public Domain).

STORY CONTEXT (What happened before):
{previous_recap}

NEW TEXT (Just happened):
{text}

TASK:
Write a concise (2-3 sentences) summary of the NEW TEXT that integrates it with the STORY CONTEXT.
- Explicitly name characters (e.g. use "Gregor", not "he").
- Explain how the plot has advanced.
- Start with "Previously:" or just the summary."#;

const RECOMMEND_PROMPT: &str = r#"You are a librarian.

THE USER HAS READ:
{read_titles}

THE AVAILABLE LIBRARY:
{library}

TASK:
Select exactly 3 books from the LIBRARY that the user would enjoy based on what they have read.

OUTPUT FORMAT:
Return ONLY a raw JSON list of the book IDs. Do not use markdown blocks.
Example: ["pg123", "pg99", "pg45"]"#;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use dailylit_core::domain::Book;
use dailylit_core::ports::{PortError, PortResult, RecapService};
use tracing::warn;

use crate::retry::{RetryClass, RetryPolicy};

/// The provider sees at most this many characters of chunk text per prompt.
const MAX_PROMPT_CHARS: usize = 10_000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `RecapService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiRecapAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiRecapAdapter {
    /// Creates a new `OpenAiRecapAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self {
            client,
            model,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One round trip to the chat completions endpoint.
    async fn complete(&self, system: &str, user: String) -> Result<String, OpenAIError> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()?;

        let response = self.client.chat().create(request).await?;

        match response.choices.into_iter().next() {
            Some(choice) => match choice.message.content {
                Some(content) => Ok(content),
                None => Err(OpenAIError::InvalidArgument(
                    "model returned empty response".to_string(),
                )),
            },
            None => Err(OpenAIError::InvalidArgument(
                "model returned no choices".to_string(),
            )),
        }
    }
}

/// Rate-limit responses get the full backoff treatment; everything else is a
/// short-pause transient.
fn classify(err: &OpenAIError) -> RetryClass {
    let msg = err.to_string().to_lowercase();
    if msg.contains("rate limit") || msg.contains("rate_limit") || msg.contains("429") {
        RetryClass::RateLimited
    } else {
        RetryClass::Transient
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Strips markdown code fences the model sometimes wraps around JSON output.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

//=========================================================================================
// `RecapService` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecapService for OpenAiRecapAdapter {
    /// Produces a 2-3 sentence rolling recap, retrying rate limits with
    /// exponential backoff plus jitter, bounded by the policy's attempt cap.
    async fn summarize(
        &self,
        current_text: &str,
        previous_recap: Option<&str>,
    ) -> PortResult<String> {
        let text = truncate_chars(current_text, MAX_PROMPT_CHARS);
        let prompt = match previous_recap {
            None => FIRST_CHUNK_PROMPT.replace("{text}", text),
            Some(recap) => CONTINUATION_PROMPT
                .replace("{previous_recap}", recap)
                .replace("{text}", text),
        };

        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self
                .complete("You are a careful literary assistant.", prompt.clone())
                .await
            {
                Ok(content) => return Ok(content.trim().to_string()),
                Err(e) => {
                    let class = classify(&e);
                    warn!(attempt, error = %e, "recap generation attempt failed");
                    last_err = Some(e);
                    // No point sleeping after the final attempt.
                    if attempt + 1 < self.retry.max_attempts {
                        self.retry.pause(class, attempt).await;
                    }
                }
            }
        }

        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string());
        if reason.to_lowercase().contains("rate") {
            Err(PortError::RateLimited(reason))
        } else {
            Err(PortError::Unexpected(reason))
        }
    }

    /// Single-shot recommendation call. Errors and unparseable output both
    /// surface as failures for the caller's random-sampling fallback.
    async fn recommend(
        &self,
        read_titles: &[String],
        candidates: &[Book],
    ) -> PortResult<Vec<String>> {
        let mut library = String::new();
        for book in candidates {
            library.push_str(&format!(
                "{}: {} by {}\n",
                book.book_id, book.title, book.author
            ));
        }

        let prompt = RECOMMEND_PROMPT
            .replace("{read_titles}", &read_titles.join(", "))
            .replace("{library}", &library);

        let raw = self
            .complete("You are a librarian recommending classic literature.", prompt)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let cleaned = strip_code_fences(&raw);
        match serde_json::from_str::<Vec<String>>(cleaned) {
            Ok(ids) => Ok(ids),
            Err(e) => {
                warn!(error = %e, raw = %raw, "recommendation output was not a JSON list");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte characters must not be split.
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(
            strip_code_fences("```json\n[\"pg84\"]\n```"),
            "[\"pg84\"]"
        );
        assert_eq!(strip_code_fences("```\n[\"pg84\"]\n```"), "[\"pg84\"]");
        assert_eq!(strip_code_fences("[\"pg84\"]"), "[\"pg84\"]");
    }

    #[test]
    fn classifies_rate_limit_messages() {
        let err = OpenAIError::InvalidArgument("Rate limit exceeded, retry later".to_string());
        assert_eq!(classify(&err), RetryClass::RateLimited);
        let err = OpenAIError::InvalidArgument("gateway timeout".to_string());
        assert_eq!(classify(&err), RetryClass::Transient);
    }
}
