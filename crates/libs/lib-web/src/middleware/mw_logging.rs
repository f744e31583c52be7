//! # Request/Response Logging Middleware
//!
//! Logs method, path, client address and outcome of every HTTP request. The client
//! address is the first forwarding header (`X-Forwarded-For`, `X-Real-IP`), else the
//! peer address from `ConnectInfo`. Durations count from the request's
//! [`RequestStamp`] when it has one.
//!
//! Socket upgrades show up here as `101 Switching Protocols`; what happens on the
//! socket afterwards is logged by the socket handler under `[WS]`.

use super::mw_req_stamp::RequestStamp;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Forwarding headers win over the socket peer, which is the proxy when there is one.
fn client_addr(req: &Request) -> Option<String> {
    req.headers()
        .get("x-forwarded-for")
        .or_else(|| req.headers().get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
        })
}

/// Request id and start instant, taken from the stamp when present.
fn stamp_of(req: &Request) -> (String, Instant) {
    match req.extensions().get::<RequestStamp>() {
        Some(stamp) => (stamp.id.clone(), stamp.received_at),
        None => ("unknown".to_string(), Instant::now()),
    }
}

pub async fn log_requests(req: Request, next: Next) -> Response {
    let (request_id, start) = stamp_of(&req);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = client_addr(&req);

    let is_upgrade = req
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = ?client_ip,
        is_upgrade,
        "[REQUEST] {} {}",
        method,
        path
    );

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();
    let status_code = status.as_u16();

    if status.is_server_error() {
        error!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status_code,
            duration_ms = duration.as_millis(),
            "[RESPONSE] {} {} -> {} ({}ms) [SERVER ERROR]",
            method,
            path,
            status_code,
            duration.as_millis()
        );
    } else if status.is_client_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status_code,
            is_upgrade,
            duration_ms = duration.as_millis(),
            "[RESPONSE] {} {} -> {} ({}ms) [CLIENT ERROR]",
            method,
            path,
            status_code,
            duration.as_millis()
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status_code,
            duration_ms = duration.as_millis(),
            "[RESPONSE] {} {} -> {} ({}ms)",
            method,
            path,
            status_code,
            duration.as_millis()
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::time::Duration;

    fn request() -> axum::http::request::Builder {
        axum::http::Request::builder().uri("/health")
    }

    #[test]
    fn test_client_addr_falls_back_to_peer() {
        let peer: SocketAddr = "10.0.0.7:51234".parse().unwrap();

        let mut req = request().body(Body::empty()).unwrap();
        assert_eq!(client_addr(&req), None);

        req.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(client_addr(&req).as_deref(), Some("10.0.0.7:51234"));

        let mut forwarded = request()
            .header("x-real-ip", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        forwarded.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(client_addr(&forwarded).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_duration_counts_from_stamp() {
        let received_at = Instant::now() - Duration::from_millis(250);
        let mut req = request().body(Body::empty()).unwrap();
        req.extensions_mut().insert(RequestStamp {
            id: "req-1".to_string(),
            received_at,
        });

        let (request_id, start) = stamp_of(&req);
        assert_eq!(request_id, "req-1");
        assert_eq!(start, received_at);
        assert!(start.elapsed() >= Duration::from_millis(250));

        let (request_id, _) = stamp_of(&request().body(Body::empty()).unwrap());
        assert_eq!(request_id, "unknown");
    }
}
