//! Rate Limit Middleware
//!
//! Applies the configured per-client quota to every routed request and
//! reports the decision in `x-ratelimit-*` response headers.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::handlers::AppState;
use crate::clock::to_datetime;
use crate::coordination::RateDecision;
use crate::models::ErrorResponse;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Identity used when the client address is unknown.
const ANONYMOUS: &str = "anonymous";

/// Namespace of identities counted by this middleware.
pub const CLIENT_IDENTITY_PREFIX: &str = "client:";

/// Middleware counting one request against the calling client.
///
/// Denied requests are answered with 429 and never reach the handler.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let identity = client_identity(&req);
    let decision = match state
        .limiter
        .allow(
            &format!("{}{}", CLIENT_IDENTITY_PREFIX, identity),
            state.config.rate_limit_max_requests,
            state.config.rate_limit_window(),
        )
        .await
    {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        let now = to_datetime(state.clock.now_ms());
        let retry_after_ms = (decision.reset_at - now).num_milliseconds().max(0);
        let retry_after = (retry_after_ms + 999) / 1000;
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new(format!(
                "Rate limit exceeded for '{}'",
                identity
            ))),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    };

    apply_headers(response.headers_mut(), &decision);
    response
}

/// First `x-forwarded-for` hop, then the peer address.
///
/// A hop that is not an IP address is ignored, which also bounds the
/// identity length.
fn client_identity(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATE_LIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}
