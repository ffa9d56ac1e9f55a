use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::services::{AppState, QUESTIONS_ENDPOINT, SESSIONS_ENDPOINT};

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // x-forwarded-for can be a comma separated list; take first
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            // forwarded: for=1.2.3.4; proto=http; by=...
            for part in s.split(';') {
                let p = part.trim();
                if p.starts_with("for=") {
                    let val = p.trim_start_matches("for=").trim().trim_matches('\"');
                    return val.to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    // Fall back to ConnectInfo socket address if available
    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

pub async fn sessions_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    enforce_limit(&state, SESSIONS_ENDPOINT, request, next).await
}

pub async fn questions_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    enforce_limit(&state, QUESTIONS_ENDPOINT, request, next).await
}

/// Check the injected limiter for `endpoint`, keyed by client IP.
async fn enforce_limit(
    state: &AppState,
    endpoint: &str,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());

    if !state.rate_limiter.check_limit(endpoint, &client_ip) {
        tracing::warn!(
            "Rate limit exceeded for IP: {} on endpoint group: {}",
            client_ip,
            endpoint
        );
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}
