//! # Web Library
//!
//! Socket handlers, middleware, the chat pipeline and server startup for the
//! persona chat relay.

pub mod chat;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{create_router, start_server, ServerConfig};
