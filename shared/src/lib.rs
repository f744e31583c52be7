//! # Shared Wire Protocol Library
//!
//! This library defines the contract between browser clients and the chat relay.
//! Every frame on the WebSocket is a UTF-8 JSON object described by a type in [`dto`].
//!
//! ## Structure
//!
//! - **[`dto`]**: Data Transfer Objects for socket communication
//!   - **[`dto::chat`]**: inbound client frames and outbound server events
//!
//! ## Wire Format
//!
//! - Field names are **snake_case** in both Rust and JSON
//! - Outbound events carry a `type` discriminator (`history`, `new_message`, `animal_response`)
//! - Inbound frames are either a plain chat frame or a scripted `user_message` frame
//!
//! ## Usage
//!
//! ```rust
//! use shared::dto::chat::{ClientFrame, ServerEvent};
//!
//! let frame = ClientFrame::parse(r#"{"username":"alice","message":"hi"}"#).unwrap();
//! assert!(matches!(frame, ClientFrame::Chat(_)));
//!
//! let event = ServerEvent::new_message("alice", "hi");
//! let json = serde_json::to_string(&event).unwrap();
//! assert!(json.contains(r#""type":"new_message""#));
//! ```

pub mod dto;
