//! # HTTP Request Handlers
//!
//! - **[`websocket`]**: chat socket endpoints
//!   - `GET /ws` - global scope
//!   - `GET /ws/{session_id}` - session scope
//!
//! Static pages (`/`, `/mobile`, `/static/*`) and `/health` are wired directly in
//! [`crate::server::create_router`].

pub mod websocket;
