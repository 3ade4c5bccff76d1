//! Inbound rate limiting, one quota per client IP.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::Clock, DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::app::AppState;
use crate::error::ApiError;

/// Bucket shared by requests whose peer address is unknown.
const UNKNOWN_PEER: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Keyed governor limiter shared by all requests.
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    per_minute: u32,
}

impl ClientRateLimiter {
    /// Returns `None` when limiting is disabled (`per_minute == 0`).
    pub fn new(per_minute: u32) -> Option<Self> {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute)?);
        Some(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            per_minute,
        })
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    /// `Err` carries the whole seconds to wait, at least 1.
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        self.limiter.check_key(&client).map_err(|not_until| {
            let now = governor::clock::DefaultClock::default().now();
            not_until.wait_time_from(now).as_secs().max(1)
        })
    }
}

impl std::fmt::Debug for ClientRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRateLimiter")
            .field("per_minute", &self.per_minute)
            .field("tracked_clients", &self.limiter.len())
            .finish()
    }
}

fn client_ip(req: &Request<Body>) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(UNKNOWN_PEER)
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let client = client_ip(&req);
        if let Err(retry_after) = limiter.check(client) {
            tracing::warn!(client = %client, retry_after = retry_after, "Client rate limited");
            return ApiError::RateLimited(Some(retry_after)).into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_disables_limiting() {
        assert!(ClientRateLimiter::new(0).is_none());
    }

    #[test]
    fn test_clients_have_independent_quotas() {
        let limiter = ClientRateLimiter::new(2).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_ok());
        let retry_after = limiter.check(a).unwrap_err();
        assert!(retry_after >= 1);

        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn test_unknown_peer_uses_shared_bucket() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), UNKNOWN_PEER);
    }
}
