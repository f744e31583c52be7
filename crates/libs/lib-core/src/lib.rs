//! # Core Library
//!
//! Configuration, error type and the persisted message log for the chat relay.

pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use config::{Config, ReplyMode, ScopeMode};
pub use error::{AppError, Result};
pub use model::store::{create_pool, DbPool, Message, MessageStore};
