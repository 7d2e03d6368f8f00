use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use ctms_auth::SessionToken;

use crate::app::errors;
use crate::context::{BearerToken, ClientContext};

/// Require `Authorization: Bearer <token>` and expose it to handlers.
pub async fn bearer_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token.to_string(),
        Err(status) => {
            return errors::json_error(status, "invalid_token", "Please log in to continue");
        }
    };

    req.extensions_mut()
        .insert(BearerToken::new(SessionToken::from_string(token)));

    next.run(req).await
}

/// Record client IP and user agent for audit purposes.
///
/// The IP comes from the first `X-Forwarded-For` hop when present, otherwise
/// from the peer address.
pub async fn client_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let context = ClientContext::new(
        forwarded_for(req.headers()).or(peer),
        header_value(req.headers(), axum::http::header::USER_AGENT),
    );
    req.extensions_mut().insert(context);

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn header_value(headers: &HeaderMap, name: axum::http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
