//! # Chat Pipeline
//!
//! Per-frame control flow tying the store, the registry and the reply source together.
//!
//! A valid frame goes through five strictly sequential steps:
//!
//! 1. persist the user message (failure is logged, the turn continues)
//! 2. broadcast it as `new_message` to the scope
//! 3. read the scope history (failure yields an empty history)
//! 4. produce the persona reply (generated, or looked up in scripted mode)
//! 5. persist the reply, wait the pacing delay, broadcast it
//!
//! Invalid frames are rejected with [`AppError::InvalidInput`] before any side effect.

use super::registry::{BroadcastReport, ConnectionRegistry, Membership, Outbound, Scope};
use super::responder::{CompletionClient, ResponseGenerator};
use super::scripted::ScriptedReplies;
use lib_core::{AppError, Config, Message, MessageStore, ReplyMode, Result};
use shared::dto::chat::{ChatFrame, ClientFrame, HistoryEntry, ScriptedFrame, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Longest accepted username (and persona name), in characters.
pub const MAX_USERNAME_CHARS: usize = 64;

/// Longest accepted message text, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Author name for scripted frames that carry no username.
pub const DEFAULT_VISITOR_NAME: &str = "visitor";

/// Where persona replies come from.
#[derive(Clone)]
pub enum ReplySource {
    Generated(ResponseGenerator),
    Scripted(ScriptedReplies),
}

/// How the reply of a turn is announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplyKind {
    /// `new_message` under the persona's name
    Chat,
    /// `animal_response` from the addressed animal
    Animal,
}

/// A validated inbound frame.
#[derive(Debug, PartialEq, Eq)]
struct Turn {
    username: String,
    text: String,
    persona: String,
    /// Scripted table key
    reply_key: String,
    kind: ReplyKind,
}

impl Turn {
    fn from_frame(frame: ClientFrame, persona_name: &str) -> Result<Self> {
        match frame {
            ClientFrame::Chat(ChatFrame { username, message }) => {
                let username = require("username", &username, MAX_USERNAME_CHARS)?;
                let text = require("message", &message, MAX_MESSAGE_CHARS)?;

                Ok(Turn {
                    username,
                    reply_key: text.clone(),
                    text,
                    persona: persona_name.to_string(),
                    kind: ReplyKind::Chat,
                })
            }
            ClientFrame::Scripted(ScriptedFrame {
                animal,
                content_key,
                content,
                username,
                ..
            }) => {
                let persona = require("animal", &animal, MAX_USERNAME_CHARS)?;
                let reply_key = require("content_key", &content_key, MAX_MESSAGE_CHARS)?;

                let username = match username.filter(|u| !u.trim().is_empty()) {
                    Some(username) => require("username", &username, MAX_USERNAME_CHARS)?,
                    None => DEFAULT_VISITOR_NAME.to_string(),
                };
                let text = match content.filter(|c| !c.trim().is_empty()) {
                    Some(content) => require("content", &content, MAX_MESSAGE_CHARS)?,
                    None => reply_key.clone(),
                };

                Ok(Turn {
                    username,
                    text,
                    persona,
                    reply_key,
                    kind: ReplyKind::Animal,
                })
            }
        }
    }
}

/// Trimmed, non-empty and at most `max_chars` long.
fn require(field: &str, value: &str, max_chars: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value.chars().count() > max_chars {
        return Err(AppError::InvalidInput(format!(
            "{} exceeds {} characters",
            field, max_chars
        )));
    }
    Ok(value.to_string())
}

fn encode(event: &ServerEvent) -> Result<String> {
    event
        .encode()
        .map_err(|e| AppError::Internal(format!("Failed to encode event: {}", e)))
}

/// What happened during one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Id of the persisted user message, `None` when the write failed
    pub user_message_id: Option<i64>,
    pub user_broadcast: BroadcastReport,
    /// Reply text, `None` on a scripted miss
    pub reply: Option<String>,
    pub reply_broadcast: Option<BroadcastReport>,
}

/// Orchestrates every connection's frames.
#[derive(Clone)]
pub struct ChatPipeline {
    store: MessageStore,
    registry: Arc<ConnectionRegistry>,
    replies: ReplySource,
    persona_name: String,
    pacing_delay: Duration,
}

impl ChatPipeline {
    pub fn new(
        store: MessageStore,
        registry: Arc<ConnectionRegistry>,
        replies: ReplySource,
        persona_name: impl Into<String>,
        pacing_delay: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            replies,
            persona_name: persona_name.into(),
            pacing_delay,
        }
    }

    /// Build the pipeline described by `config`.
    ///
    /// `client` is only used in AI mode; scripted mode loads its table here.
    pub fn from_config(
        config: &Config,
        store: MessageStore,
        registry: Arc<ConnectionRegistry>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let replies = match config.reply_mode {
            ReplyMode::Ai => ReplySource::Generated(ResponseGenerator::new(
                client,
                config.persona_prompt.clone(),
                config.fallback_reply.clone(),
                config.ai_max_concurrency,
            )),
            ReplyMode::Scripted => {
                ReplySource::Scripted(ScriptedReplies::load(config.scripted_replies_path.as_deref())?)
            }
        };

        Ok(Self::new(
            store,
            registry,
            replies,
            config.persona_name.clone(),
            config.pacing_delay(),
        ))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn persona_name(&self) -> &str {
        &self.persona_name
    }

    /// Encoded `history` event with every message of `scope`, oldest first.
    pub async fn history_event(&self, scope: &Scope) -> Result<String> {
        let data = self
            .store
            .read_all_or_empty(scope.session_id())
            .await
            .into_iter()
            .map(|message| HistoryEntry {
                timestamp: message.timestamp_rfc3339(),
                username: message.username,
                message: message.text,
            })
            .collect();

        encode(&ServerEvent::History { data })
    }

    /// Register a new connection and return its encoded `history` event.
    ///
    /// The history is not queued: broadcasts may reach `outbound` while it is
    /// read, so the caller must write it to the socket before draining the queue.
    /// On error the membership is dropped, so the connection is already unregistered.
    pub async fn join(&self, scope: Scope, outbound: Outbound) -> Result<(Membership, String)> {
        let membership = self.registry.register(scope, outbound);
        let history = self.history_event(membership.scope()).await?;
        Ok((membership, history))
    }

    /// Run one raw text frame through the five steps.
    pub async fn handle_text(&self, scope: &Scope, raw: &str) -> Result<TurnOutcome> {
        let turn = Turn::from_frame(ClientFrame::parse(raw)?, &self.persona_name)?;
        let session_id = scope.session_id();
        let mut outcome = TurnOutcome::default();

        // 1. persist
        outcome.user_message_id = self.persist(&turn.username, &turn.text, session_id).await;

        // 2. fan out
        let event = ServerEvent::new_message(turn.username.as_str(), turn.text.as_str());
        outcome.user_broadcast = self.registry.broadcast(scope, &encode(&event)?);

        // 3. context
        let history = self.store.read_all_or_empty(session_id).await;

        // 4. reply
        let Some(reply) = self.reply_for(&turn, &history).await else {
            info!(
                scope = %scope,
                persona = %turn.persona,
                key = %turn.reply_key,
                "[PIPELINE] NO_REPLY persona={} key='{}'",
                turn.persona,
                turn.reply_key
            );
            return Ok(outcome);
        };

        // 5. persist, pace, fan out
        self.persist(&turn.persona, &reply, session_id).await;
        tokio::time::sleep(self.pacing_delay).await;

        let event = match turn.kind {
            ReplyKind::Chat => ServerEvent::new_message(turn.persona.as_str(), reply.as_str()),
            ReplyKind::Animal => ServerEvent::animal_response(turn.persona.as_str(), reply.as_str()),
        };
        outcome.reply_broadcast = Some(self.registry.broadcast(scope, &encode(&event)?));
        outcome.reply = Some(reply);

        debug!(
            scope = %scope,
            user_message_id = ?outcome.user_message_id,
            "[PIPELINE] TURN_COMPLETE scope={}",
            scope
        );

        Ok(outcome)
    }

    async fn reply_for(&self, turn: &Turn, history: &[Message]) -> Option<String> {
        match &self.replies {
            ReplySource::Generated(generator) => Some(generator.generate(&turn.persona, history).await),
            ReplySource::Scripted(table) => table
                .lookup(&turn.persona, &turn.reply_key)
                .map(str::to_string),
        }
    }

    async fn persist(&self, username: &str, text: &str, session_id: Option<&str>) -> Option<i64> {
        match self.store.append(username, text, session_id).await {
            Ok(message) => Some(message.id),
            Err(e) => {
                error!(
                    username = %username,
                    session_id = ?session_id,
                    error = %e,
                    "[PIPELINE] PERSIST_FAILED username={} - continuing without storage: {}",
                    username,
                    e
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.replies {
            ReplySource::Generated(_) => "generated",
            ReplySource::Scripted(_) => "scripted",
        };
        f.debug_struct("ChatPipeline")
            .field("persona_name", &self.persona_name)
            .field("replies", &mode)
            .field("pacing_delay", &self.pacing_delay)
            .finish()
    }
}
