//! # Response Generator
//!
//! Turns a conversation transcript into persona text through an external AI service.
//!
//! The service is reached through the [`CompletionClient`] trait. Whatever goes wrong
//! on the way (provider error, network failure, empty or unusable text, a panicking
//! client, a closed worker pool), [`ResponseGenerator::generate`] answers with the
//! configured fallback reply instead.
//!
//! Every call runs on its own spawned task and holds one permit of a bounded
//! semaphore while in flight, so a slow provider only suspends the connection
//! that asked for the reply.

use async_trait::async_trait;
use lib_core::{AppError, Message, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Longest reply forwarded to clients, in characters.
pub const MAX_RESPONSE_CHARS: usize = 1000;

/// Phrases models like to open with that make no sense in a persona's mouth.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "As an AI assistant, ",
    "As an AI, ",
    "I'm an AI assistant, ",
    "I'm an AI, ",
    "As a language model, ",
];

/// One round-trip to a text-generation service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` and return the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Short label for logs (provider and model).
    fn describe(&self) -> String;
}

/// Client used when no AI provider is configured; every call fails.
#[derive(Debug, Default, Clone)]
pub struct OfflineClient;

#[async_trait]
impl CompletionClient for OfflineClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(AppError::Ai("no AI provider is configured".to_string()))
    }

    fn describe(&self) -> String {
        "offline".to_string()
    }
}

/// Persona reply generator with total failure containment.
#[derive(Clone)]
pub struct ResponseGenerator {
    client: Arc<dyn CompletionClient>,
    prompt_template: String,
    fallback: String,
    permits: Arc<Semaphore>,
}

impl ResponseGenerator {
    /// # Arguments
    ///
    /// * `client` - Transport to the AI service
    /// * `prompt_template` - Persona prompt; `{persona}` is replaced per call
    /// * `fallback` - Reply used on any failure, must not be empty
    /// * `max_concurrency` - AI calls allowed in flight at once (at least 1)
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompt_template: impl Into<String>,
        fallback: impl Into<String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            client,
            prompt_template: prompt_template.into(),
            fallback: fallback.into(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Persona prompt followed by one `username: text` line per message.
    pub fn render_prompt(&self, persona: &str, history: &[Message]) -> String {
        let mut prompt = self.prompt_template.replace("{persona}", persona);
        prompt.push_str("\n\n");

        if history.is_empty() {
            prompt.push_str("(The conversation has not started yet.)");
        } else {
            let transcript: Vec<String> = history.iter().map(Message::transcript_line).collect();
            prompt.push_str(&transcript.join("\n"));
        }

        prompt
    }

    /// Generate the reply of `persona` to `history`. Never fails, never empty.
    pub async fn generate(&self, persona: &str, history: &[Message]) -> String {
        let started = Instant::now();

        match self.try_generate(persona, history).await {
            Ok(reply) => {
                info!(
                    persona = %persona,
                    client = %self.client.describe(),
                    history_len = history.len(),
                    reply_chars = reply.chars().count(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "[AI] REPLY_GENERATED persona={} chars={} ({}ms)",
                    persona,
                    reply.chars().count(),
                    started.elapsed().as_millis()
                );
                reply
            }
            Err(e) => {
                warn!(
                    persona = %persona,
                    client = %self.client.describe(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis(),
                    "[AI] FALLBACK persona={} error={}",
                    persona,
                    e
                );
                self.fallback_reply()
            }
        }
    }

    async fn try_generate(&self, persona: &str, history: &[Message]) -> Result<String> {
        let prompt = self.render_prompt(persona, history);

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("AI worker pool is closed".to_string()))?;

        let client = Arc::clone(&self.client);
        debug!(
            client = %client.describe(),
            prompt_chars = prompt.chars().count(),
            "[AI] Dispatching completion request"
        );

        let raw = tokio::spawn(async move {
            let _permit = permit;
            client.complete(&prompt).await
        })
        .await
        .map_err(|e| AppError::Internal(format!("AI worker task failed: {}", e)))??;

        clean_response(&raw)
            .ok_or_else(|| AppError::Ai("empty response from AI service".to_string()))
    }

    fn fallback_reply(&self) -> String {
        if self.fallback.trim().is_empty() {
            lib_core::config::DEFAULT_FALLBACK_REPLY.to_string()
        } else {
            self.fallback.clone()
        }
    }
}

/// Trim, strip assistant boilerplate and cap the length.
///
/// Returns `None` when nothing usable is left.
pub fn clean_response(raw: &str) -> Option<String> {
    let mut text = raw.trim().to_string();
    for prefix in BOILERPLATE_PREFIXES {
        text = text.replace(prefix, "");
    }
    let text = text.trim();

    if text.is_empty() {
        return None;
    }

    Some(truncate_reply(text, MAX_RESPONSE_CHARS))
}

/// Cap `text` at `max_chars`, preferring to cut after a sentence, then at a space.
fn truncate_reply(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let head = &text[..cut];
    if let Some(end) = head.rfind('.') {
        format!("{}...", &head[..=end])
    } else if let Some(end) = head.rfind(' ') {
        format!("{}...", &head[..end])
    } else {
        format!("{}...", head)
    }
}
