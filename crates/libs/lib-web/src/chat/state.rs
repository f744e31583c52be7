//! # Chat State
//!
//! Shared state handed to the socket handlers.

use super::pipeline::ChatPipeline;
use super::registry::{ConnectionRegistry, Scope};
use lib_core::ScopeMode;
use std::sync::Arc;

/// Application state for the chat routes.
#[derive(Clone, Debug)]
pub struct ChatAppState {
    pub pipeline: ChatPipeline,
    pub scope_mode: ScopeMode,
}

impl ChatAppState {
    pub fn new(pipeline: ChatPipeline, scope_mode: ScopeMode) -> Self {
        Self { pipeline, scope_mode }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.pipeline.registry()
    }

    /// Scope a connection joins, given the session id from its path.
    ///
    /// With `BROADCAST_SCOPE=global` the path is ignored.
    pub fn scope_for(&self, session_id: Option<String>) -> Scope {
        match (self.scope_mode, session_id) {
            (ScopeMode::Session, Some(id)) => Scope::Session(id),
            _ => Scope::Global,
        }
    }
}

impl axum::extract::FromRef<ChatAppState> for ChatPipeline {
    fn from_ref(state: &ChatAppState) -> Self {
        state.pipeline.clone()
    }
}

impl axum::extract::FromRef<ChatAppState> for ScopeMode {
    fn from_ref(state: &ChatAppState) -> Self {
        state.scope_mode
    }
}
