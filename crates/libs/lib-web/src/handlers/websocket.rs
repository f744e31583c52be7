//! # WebSocket Handlers
//!
//! Chat socket endpoints. Each connection runs as a writer task draining its
//! outbound queue and a reader task feeding text frames to the [`ChatPipeline`].
//!
//! ## Endpoints
//!
//! - `GET /ws` - join the global scope
//! - `GET /ws/{session_id}` - join a session (global when `BROADCAST_SCOPE=global`)
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8000/ws/room-1');
//! ws.onmessage = (event) => console.log(JSON.parse(event.data));
//! ws.send(JSON.stringify({ username: 'alice', message: 'hi' }));
//! ```

use crate::chat::{ChatAppState, ChatPipeline, Scope, OUTBOUND_BUFFER};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use lib_core::AppError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Largest inbound frame accepted, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Session ids are 1 to 64 characters of `[A-Za-z0-9_-]`.
pub fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    let valid_len = (1..=MAX_SESSION_ID_LEN).contains(&session_id.len());
    let valid_chars = session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "session id must be 1-{} characters of letters, digits, '_' or '-'",
            MAX_SESSION_ID_LEN
        )))
    }
}

/// **Route**: `GET /ws`
pub async fn global_websocket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ChatAppState>,
) -> Response {
    let scope = state.scope_for(None);
    upgrade(ws, &headers, addr, state.pipeline, scope)
}

/// **Route**: `GET /ws/{session_id}`
///
/// Rejects malformed session ids with `400 Bad Request` before upgrading.
pub async fn session_websocket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ChatAppState>,
) -> Response {
    if let Err(e) = validate_session_id(&session_id) {
        warn!(
            session_id = %session_id,
            "[WS] REJECTED session_id='{}' - {}",
            session_id,
            e
        );
        return e.into_response();
    }

    let scope = state.scope_for(Some(session_id));
    upgrade(ws, &headers, addr, state.pipeline, scope)
}

fn upgrade(
    ws: WebSocketUpgrade,
    headers: &HeaderMap,
    addr: SocketAddr,
    pipeline: ChatPipeline,
    scope: Scope,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string());

    debug!(
        client_ip = %client_ip,
        scope = %scope,
        "[WS] UPGRADE_START ip={} scope={}",
        client_ip,
        scope
    );

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, pipeline, scope, client_ip))
        .into_response()
}

/// Drive one connection from Connecting to Closed.
async fn handle_socket(socket: WebSocket, pipeline: ChatPipeline, scope: Scope, client_ip: String) {
    let connection_start = Instant::now();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let (membership, history) = match pipeline.join(scope.clone(), outbound_tx).await {
        Ok(joined) => joined,
        Err(e) => {
            error!(
                scope = %scope,
                error = %e,
                "[WS] JOIN_FAILED scope={} error={}",
                scope,
                e
            );
            let _ = sender.send(WsMessage::Close(None)).await;
            return;
        }
    };
    let client_id = membership.id();

    info!(
        client_id = %client_id,
        client_ip = %client_ip,
        scope = %scope,
        "[WS] CONNECTED client_id={} ip={} scope={}",
        client_id,
        client_ip,
        scope
    );

    // History goes out before the writer starts; broadcasts queued meanwhile wait behind it.
    if let Err(e) = sender.send(WsMessage::Text(history.into())).await {
        warn!(
            client_id = %client_id,
            error = %e,
            "[WS] HISTORY_SEND_ERROR client_id={} error={}",
            client_id,
            e
        );
        return;
    }

    let messages_sent = Arc::new(AtomicU64::new(1));
    let messages_received = Arc::new(AtomicU64::new(0));

    // Writer: drain the outbound queue into the socket.
    let messages_sent_send = Arc::clone(&messages_sent);
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = sender.send(WsMessage::Text(payload.into())).await {
                warn!(
                    client_id = %client_id,
                    error = %e,
                    "[WS] SEND_ERROR client_id={} error={}",
                    client_id,
                    e
                );
                break;
            }
            messages_sent_send.fetch_add(1, Ordering::Relaxed);
        }
    });

    // Reader: run each text frame through the pipeline, one at a time.
    let messages_received_recv = Arc::clone(&messages_received);
    let recv_scope = scope.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    messages_received_recv.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        client_id = %client_id,
                        message_size = text.len(),
                        "[WS] MESSAGE_RECEIVED client_id={} size={}",
                        client_id,
                        text.len()
                    );

                    if let Err(e) = pipeline.handle_text(&recv_scope, text.as_str()).await {
                        warn!(
                            client_id = %client_id,
                            error = %e,
                            "[WS] INVALID_FRAME client_id={} error={}",
                            client_id,
                            e
                        );
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    let close_reason = frame
                        .as_ref()
                        .map(|f| f.code.to_string())
                        .unwrap_or_else(|| "none".to_string());
                    info!(
                        client_id = %client_id,
                        reason = %close_reason,
                        "[WS] CLOSE_RECEIVED client_id={} code={}",
                        client_id,
                        close_reason
                    );
                    break;
                }
                Ok(WsMessage::Binary(data)) => {
                    debug!(
                        client_id = %client_id,
                        message_size = data.len(),
                        "[WS] BINARY_IGNORED client_id={} size={}",
                        client_id,
                        data.len()
                    );
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Err(e) => {
                    warn!(
                        client_id = %client_id,
                        error = %e,
                        "[WS] RECV_ERROR client_id={} error={}",
                        client_id,
                        e
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        result = &mut send_task => {
            recv_task.abort();
            if let Err(e) = result {
                error!(client_id = %client_id, error = ?e, "[WS] SEND_TASK_ERROR client_id={} error={:?}", client_id, e);
            }
        }
        result = &mut recv_task => {
            send_task.abort();
            if let Err(e) = result {
                error!(client_id = %client_id, error = ?e, "[WS] RECV_TASK_ERROR client_id={} error={:?}", client_id, e);
            }
        }
    }

    membership.release();

    let duration = connection_start.elapsed();
    let sent_count = messages_sent.load(Ordering::Relaxed);
    let received_count = messages_received.load(Ordering::Relaxed);
    info!(
        client_id = %client_id,
        client_ip = %client_ip,
        scope = %scope,
        duration_ms = duration.as_millis(),
        messages_sent = sent_count,
        messages_received = received_count,
        "[WS] DISCONNECTED client_id={} scope={} duration={:.2}s messages_sent={} messages_received={}",
        client_id,
        scope,
        duration.as_secs_f64(),
        sent_count,
        received_count
    );
}
