use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};

use crate::errors::AppError;
use crate::state::AppState;

/// Reject callback requests from addresses outside the configured allow-list
///
/// Runs before the body is read, so a refused caller causes no side effects.
pub async fn require_allowed_caller(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let caller = caller_address(request.headers(), peer);

    let allowed = caller.is_some_and(|ip| state.config.settlement.allowed_callers.contains(&ip));
    if !allowed {
        tracing::warn!(
            caller = ?caller,
            path = %request.uri().path(),
            "Callback from unlisted address refused"
        );
        metrics::counter!("callbacks_refused_total").increment(1);
        return AppError::Forbidden("Caller not allowed".to_string()).into_response();
    }

    next.run(request).await
}

/// First `X-Forwarded-For` hop with any port removed, else the peer address
pub fn caller_address(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match forwarded {
        Some(hop) => parse_hop(hop),
        None => peer,
    }
}

fn parse_hop(hop: &str) -> Option<IpAddr> {
    if let Ok(ip) = hop.parse::<IpAddr>() {
        return Some(ip);
    }
    // `1.2.3.4:5678` or `[::1]:5678`
    if let Ok(addr) = hop.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    hop.strip_prefix('[')
        .and_then(|rest| rest.split(']').next())
        .and_then(|inner| inner.parse().ok())
}
