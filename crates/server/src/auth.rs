//! Optional bearer token check.
//!
//! With `--auth-token` set, every route except `/health` needs
//! `Authorization: Bearer <token>` or, for browsers opening a WebSocket,
//! `?token=<token>`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Axum middleware that rejects requests without the configured token.
pub async fn auth_middleware(
    State(expected): State<Arc<str>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let header_ok = bearer_token(req.headers()) == Some(&*expected);
    let query_ok = query_token(req.uri().query()) == Some(&*expected);
    if header_ok || query_ok {
        return Ok(next.run(req).await);
    }

    debug!(
        component = "auth",
        event = "auth.rejected",
        path = %req.uri().path(),
        "Missing or invalid auth token"
    );
    Err(StatusCode::UNAUTHORIZED)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// `?token=` for browsers, which cannot set headers on a WebSocket.
fn query_token(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}
