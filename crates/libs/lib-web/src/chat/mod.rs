//! # Chat Module
//!
//! Real-time persona chat: connection registry, reply generation and the
//! per-frame pipeline that ties them to the message store.
//!
//! ## Flow
//!
//! ```text
//! socket frame → ChatPipeline::handle_text
//!                  ├─ MessageStore::append        (user message)
//!                  ├─ ConnectionRegistry::broadcast (new_message)
//!                  ├─ MessageStore::read_all_or_empty
//!                  ├─ ResponseGenerator::generate | ScriptedReplies::lookup
//!                  └─ append, pace, broadcast     (persona reply)
//! ```

// region: --- Modules

pub mod ai_bot;
pub mod pipeline;
pub mod registry;
pub mod responder;
pub mod scripted;
pub mod state;

#[cfg(test)]
mod tests;

// endregion: --- Modules

pub use ai_bot::{build_completion_client, AiProvider, BotConfig};
pub use pipeline::{ChatPipeline, ReplySource, TurnOutcome};
pub use registry::{BroadcastReport, ConnectionId, ConnectionRegistry, Membership, Scope, OUTBOUND_BUFFER};
pub use responder::{CompletionClient, OfflineClient, ResponseGenerator};
pub use scripted::ScriptedReplies;
pub use state::ChatAppState;
