use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::USER_AGENT, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Tracked clients above this count trigger a sweep of idle entries.
const SWEEP_THRESHOLD: usize = 10_000;

/// Per-client limit of `max_requests` per `window`, refilled evenly (GCRA).
pub struct RateLimiter {
    window: Duration,
    limiter: DefaultKeyedRateLimiter<String>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let period = (window / burst.get()).max(Duration::from_nanos(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            window,
            limiter: DefaultKeyedRateLimiter::keyed(quota),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts one request for `client`. Returns false when the client is
    /// over its budget.
    pub fn check(&self, client: &str) -> bool {
        let allowed = self.limiter.check_key(&client.to_string()).is_ok();
        if self.limiter.len() > SWEEP_THRESHOLD {
            self.limiter.retain_recent();
            debug!(clients = self.limiter.len(), "Swept idle rate-limit entries");
        }
        allowed
    }
}

fn client_key(addr: Option<SocketAddr>, headers: &HeaderMap) -> String {
    let ip = addr
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    format!("{}|{}", ip, agent)
}

fn api_key_accepted(keys: &[String], headers: &HeaderMap) -> bool {
    if keys.is_empty() {
        return true;
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| keys.iter().any(|k| k == provided))
}

/// Middleware for `/api/*`: API key check, then rate limiting.
pub async fn api_guard(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !api_key_accepted(&state.config.server.api_keys, req.headers()) {
        warn!(path = %req.uri().path(), "Rejected request with invalid API key");
        return ApiError::unauthorized().into_response();
    }

    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(addr, req.headers());
    if !state.limiter.check(&client) {
        warn!(client = %client, "Rate limit exceeded");
        return ApiError::rate_limited(state.limiter.window().as_secs()).into_response();
    }

    next.run(req).await
}
