//! Gateway middleware.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};

use crate::context::{UNKNOWN_IP, client_ip};
use crate::server::GatewayState;

/// Tracked clients above which idle limiter entries are pruned.
const RETAIN_THRESHOLD: usize = 10_000;

/// Per-client request limiter for the auth endpoints.
pub struct GatewayRateLimiter {
    client_limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl GatewayRateLimiter {
    /// Create a limiter allowing `requests_per_minute` per client.
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            client_limiter: RateLimiter::keyed(quota),
        }
    }

    /// Check if a request from this client is allowed.
    #[must_use]
    pub fn check(&self, client_id: &str) -> bool {
        let allowed = self
            .client_limiter
            .check_key(&client_id.to_string())
            .is_ok();
        if self.client_limiter.len() > RETAIN_THRESHOLD {
            self.client_limiter.retain_recent();
            self.client_limiter.shrink_to_fit();
        }
        allowed
    }

    /// Number of clients with limiter state.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.client_limiter.len()
    }
}

/// Limiter key for a request: the socket peer, or the forwarded client when
/// the proxy headers are trusted.
fn limiter_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        client_ip(headers, peer)
    } else {
        peer.map_or_else(|| UNKNOWN_IP.to_string(), |addr| addr.ip().to_string())
    }
}

impl Default for GatewayRateLimiter {
    fn default() -> Self {
        Self::new(100)
    }
}

impl std::fmt::Debug for GatewayRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRateLimiter").finish_non_exhaustive()
    }
}

/// Reject clients over their request quota with 429.
pub async fn rate_limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = limiter_key(
        request.headers(),
        peer,
        state.config.gateway.trust_proxy_headers,
    );

    if state.limiter.check(&ip) {
        next.run(request).await
    } else {
        tracing::warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
        (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response()
    }
}
