// Per-client request rate limiting
//
// Fixed window counter per client IP. Windows are kept in a concurrent map
// and stale ones are dropped once the map grows past a small bound.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::ApiError;
use crate::state::SharedState;

/// Windows tracked before stale ones are pruned
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Allows `limit` requests per client within each `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        RateLimiter {
            windows: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Counts one request from `client`
    ///
    /// # Returns
    /// * `Ok(())` - Request allowed
    /// * `Err(secs)` - Limit reached; seconds until the window resets
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), u64> {
        if self.windows.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let mut entry = self.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            let elapsed = now.duration_since(entry.started);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(remaining.as_secs().max(1));
        }

        entry.count += 1;
        Ok(())
    }

    fn prune(&self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }

    #[cfg(test)]
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Middleware rejecting clients over their request budget with 429
///
/// Requests without connection info (e.g. in-process tests) share one bucket.
pub async fn limit_requests(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if let Err(retry_after) = state.rate_limiter.check(client) {
        debug!("Rate limit exceeded for {}", client);
        return Err(ApiError::RateLimited(retry_after));
    }

    Ok(next.run(request).await)
}
