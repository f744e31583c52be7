//! # AI Provider Client
//!
//! [`CompletionClient`] backed by rust-genai. Supports Gemini, OpenAI, Anthropic and
//! DeepSeek; the provider is picked from whichever API key is present in the
//! environment, Gemini first.

use super::responder::{CompletionClient, OfflineClient};
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(feature = "genai")]
use async_trait::async_trait;
#[cfg(feature = "genai")]
use lib_core::{AppError, Result};

/// AI Provider type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AiProvider {
    /// Google Gemini (default)
    #[default]
    Gemini,
    /// OpenAI
    OpenAI,
    /// Anthropic
    Anthropic,
    /// DeepSeek
    DeepSeek,
}

impl AiProvider {
    /// Providers in detection order.
    pub const ALL: [AiProvider; 4] = [
        AiProvider::Gemini,
        AiProvider::OpenAI,
        AiProvider::Anthropic,
        AiProvider::DeepSeek,
    ];

    /// Get the default model name for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "gemini-2.5-flash",
            AiProvider::OpenAI => "gpt-4o-mini",
            AiProvider::Anthropic => "claude-3-haiku-20240307",
            AiProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Get the environment variable name for the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "GEMINI_API_KEY",
            AiProvider::OpenAI => "OPENAI_API_KEY",
            AiProvider::Anthropic => "ANTHROPIC_API_KEY",
            AiProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

/// Provider settings for generated replies.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub provider: AiProvider,
    /// API key for the provider; empty means no provider is configured
    pub api_key: String,
    /// Model name (e.g., "gemini-2.5-flash", "gpt-4o-mini")
    pub model: String,
    /// Maximum response length in tokens
    pub max_tokens: u32,
    /// Temperature for response generation
    pub temperature: f32,
}

impl Default for BotConfig {
    fn default() -> Self {
        let provider = AiProvider::default();
        Self {
            provider,
            api_key: String::new(),
            model: provider.default_model().to_string(),
            max_tokens: 500,
            temperature: 0.8,
        }
    }
}

impl BotConfig {
    /// Read provider settings from the environment.
    ///
    /// Malformed numeric values fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let (provider, api_key) = AiProvider::ALL
            .iter()
            .find_map(|provider| {
                std::env::var(provider.api_key_env())
                    .ok()
                    .filter(|key| !key.trim().is_empty())
                    .map(|key| (*provider, key))
            })
            .unwrap_or((defaults.provider, String::new()));

        let model = std::env::var("AI_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        let max_tokens = std::env::var("AI_MAX_TOKENS")
            .ok()
            .and_then(|v| {
                v.parse::<u32>()
                    .map_err(|_| warn!("AI_MAX_TOKENS='{}' is not a number, using {}", v, defaults.max_tokens))
                    .ok()
            })
            .unwrap_or(defaults.max_tokens);

        let temperature = std::env::var("AI_TEMPERATURE")
            .ok()
            .and_then(|v| {
                v.parse::<f32>()
                    .map_err(|_| warn!("AI_TEMPERATURE='{}' is not a number, using {}", v, defaults.temperature))
                    .ok()
            })
            .unwrap_or(defaults.temperature);

        Self {
            provider,
            api_key,
            model,
            max_tokens,
            temperature,
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Build the completion client for `config`.
///
/// Without an API key, or without the `genai` feature, replies always fall back.
pub fn build_completion_client(config: &BotConfig) -> Arc<dyn CompletionClient> {
    if !config.has_api_key() {
        warn!(
            "No AI provider key found ({}); persona replies will use the fallback text",
            AiProvider::ALL
                .iter()
                .map(AiProvider::api_key_env)
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Arc::new(OfflineClient);
    }

    #[cfg(feature = "genai")]
    {
        info!(
            "AI provider: {:?} (model: {}, max_tokens: {}, temperature: {})",
            config.provider, config.model, config.max_tokens, config.temperature
        );
        Arc::new(GenAiClient::new(config.clone()))
    }

    #[cfg(not(feature = "genai"))]
    {
        info!("AI key present but the 'genai' feature is disabled; using the fallback text");
        Arc::new(OfflineClient)
    }
}

/// rust-genai client bound to one provider and model.
#[cfg(feature = "genai")]
pub struct GenAiClient {
    config: BotConfig,
    client: genai::Client,
}

#[cfg(feature = "genai")]
impl GenAiClient {
    pub fn new(config: BotConfig) -> Self {
        use genai::resolver::{AuthData, AuthResolver};

        let api_key = config.api_key.clone();
        let auth_resolver = AuthResolver::from_resolver_fn(
            move |_model_iden| -> std::result::Result<Option<AuthData>, genai::resolver::Error> {
                Ok(Some(AuthData::from_single(api_key.clone())))
            },
        );

        let client = genai::Client::builder()
            .with_auth_resolver(auth_resolver)
            .build();

        Self { config, client }
    }
}

#[cfg(feature = "genai")]
#[async_trait]
impl CompletionClient for GenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        use genai::chat::{ChatMessage, ChatOptions, ChatRequest};

        let chat_req = ChatRequest::default().append_message(ChatMessage::user(prompt));

        let chat_options = ChatOptions::default()
            .with_temperature(self.config.temperature as f64)
            .with_max_tokens(self.config.max_tokens);

        tracing::debug!("[AI] Calling {:?} with model: {}", self.config.provider, self.config.model);
        let chat_res = self
            .client
            .exec_chat(&self.config.model, chat_req, Some(&chat_options))
            .await
            .map_err(|e| AppError::Ai(format!("{:?}", e)))?;

        chat_res
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| AppError::Ai("no text in AI response".to_string()))
    }

    fn describe(&self) -> String {
        format!("{:?}/{}", self.config.provider, self.config.model)
    }
}
