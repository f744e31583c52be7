//! # Data Transfer Objects (DTOs)
//!
//! Frames exchanged between clients and the relay over the chat socket.

pub mod chat;

pub use chat::*;
