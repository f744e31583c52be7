//! # Application Configuration
//!
//! This module manages relay configuration loaded from environment variables.
//! All configuration is validated on startup to fail fast if misconfigured.
//!
//! ```rust,no_run
//! use lib_core::Config;
//!
//! let config = Config::from_env().unwrap();
//! config.validate().unwrap();
//! println!("persona: {}", config.persona_name);
//! ```

use crate::error::{AppError, Result};
use lib_utils::envs::{get_env_opt, get_env_or, get_env_parse_or};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default SQLite location, relative to the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/chat_history.db";

/// Default display name for generated replies.
pub const DEFAULT_PERSONA_NAME: &str = "Blue Magpie";

/// Default persona prompt. `{persona}` is replaced with the replying persona's name.
pub const DEFAULT_PERSONA_PROMPT: &str = "You are {persona}, a friendly character chatting with visitors. \
    Read the conversation below and reply to the latest message in a warm, engaging manner. \
    Keep it to two or three sentences.";

/// Reply used whenever the AI service cannot produce one.
pub const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I'm lost in a daydream right now. Let's talk again in a moment!";

/// Upper bound for the pacing delay.
const MAX_PACING_DELAY_MS: u64 = 60_000;

/// Where persona replies come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Generated by the external AI service
    #[default]
    Ai,
    /// Looked up in the static `(persona, content_key)` table
    Scripted,
}

impl FromStr for ReplyMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ai" | "generated" => Ok(ReplyMode::Ai),
            "scripted" | "static" => Ok(ReplyMode::Scripted),
            other => Err(AppError::Config(format!(
                "REPLY_MODE must be 'ai' or 'scripted', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyMode::Ai => write!(f, "ai"),
            ReplyMode::Scripted => write!(f, "scripted"),
        }
    }
}

/// How connections are grouped for broadcast and history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScopeMode {
    /// `/ws/{session_id}` connections form independent groups
    #[default]
    Session,
    /// Every connection shares one group regardless of path
    Global,
}

impl FromStr for ScopeMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "session" => Ok(ScopeMode::Session),
            "global" => Ok(ScopeMode::Global),
            other => Err(AppError::Config(format!(
                "BROADCAST_SCOPE must be 'session' or 'global', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::Session => write!(f, "session"),
            ScopeMode::Global => write!(f, "global"),
        }
    }
}

/// Relay configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite database connection URL
    pub database_url: String,

    /// Display name under which generated replies are stored and broadcast
    pub persona_name: String,

    /// Prompt template prepended to the transcript
    pub persona_prompt: String,

    /// Fixed text used when generation fails. Never empty.
    pub fallback_reply: String,

    /// Deliberate wait before a reply is broadcast, in milliseconds
    pub pacing_delay_ms: u64,

    pub reply_mode: ReplyMode,

    pub scope_mode: ScopeMode,

    /// Number of AI calls allowed in flight at once
    pub ai_max_concurrency: usize,

    /// Optional JSON file replacing the built-in scripted replies
    pub scripted_replies_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            persona_name: DEFAULT_PERSONA_NAME.to_string(),
            persona_prompt: DEFAULT_PERSONA_PROMPT.to_string(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            pacing_delay_ms: 1000,
            reply_mode: ReplyMode::default(),
            scope_mode: ScopeMode::default(),
            ai_max_concurrency: 4,
            scripted_replies_path: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to [`Config::default`]; present but malformed
    /// values are reported as [`AppError::Config`].
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let reply_mode = get_env_or("REPLY_MODE", &defaults.reply_mode.to_string()).parse()?;
        let scope_mode = get_env_or("BROADCAST_SCOPE", &defaults.scope_mode.to_string()).parse()?;

        let pacing_delay_ms = get_env_parse_or("PACING_DELAY_MS", defaults.pacing_delay_ms)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let ai_max_concurrency = get_env_parse_or("AI_MAX_CONCURRENCY", defaults.ai_max_concurrency)
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            database_url: get_env_or("DATABASE_URL", &defaults.database_url),
            persona_name: get_env_or("PERSONA_NAME", &defaults.persona_name),
            persona_prompt: get_env_or("PERSONA_PROMPT", &defaults.persona_prompt),
            fallback_reply: get_env_or("FALLBACK_REPLY", &defaults.fallback_reply),
            pacing_delay_ms,
            reply_mode,
            scope_mode,
            ai_max_concurrency,
            scripted_replies_path: get_env_opt("SCRIPTED_REPLIES_PATH"),
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.persona_name.trim().is_empty() {
            return Err(AppError::Config("PERSONA_NAME must not be empty".to_string()));
        }

        if self.fallback_reply.trim().is_empty() {
            return Err(AppError::Config("FALLBACK_REPLY must not be empty".to_string()));
        }

        if self.pacing_delay_ms > MAX_PACING_DELAY_MS {
            return Err(AppError::Config(format!(
                "PACING_DELAY_MS must be at most {}",
                MAX_PACING_DELAY_MS
            )));
        }

        if self.ai_max_concurrency == 0 {
            return Err(AppError::Config("AI_MAX_CONCURRENCY must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }
}
