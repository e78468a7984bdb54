// Application state shared by HTTP handlers and background tasks
//
// Everything is constructed explicitly in main and passed in, so tests can
// build the same state around fake metric sources.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::api::rate_limit::RateLimiter;
use crate::broadcast::Broadcaster;
use crate::cache::TtlCache;
use crate::config::BridgeConfig;
use crate::metrics::{ContainerMetrics, HostMetrics};
use crate::registry::SubscriberRegistry;

/// Type alias for shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Arc<BridgeConfig>,

    /// Serialized responses of the cache-backed routes
    pub cache: TtlCache<Value>,

    pub host: Arc<dyn HostMetrics>,
    pub containers: Arc<dyn ContainerMetrics>,
    pub registry: SubscriberRegistry,
    pub rate_limiter: RateLimiter,

    /// For uptime in the health report
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: BridgeConfig,
        host: Arc<dyn HostMetrics>,
        containers: Arc<dyn ContainerMetrics>,
    ) -> Self {
        AppState {
            cache: TtlCache::new(config.cache_ttl()),
            rate_limiter: RateLimiter::new(config.rate_limit_requests, config.rate_limit_window()),
            config: Arc::new(config),
            host,
            containers,
            registry: SubscriberRegistry::new(),
            started_at: Instant::now(),
        }
    }

    /// Broadcaster wired to this state's sources and subscribers
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(
            Arc::clone(&self.host),
            Arc::clone(&self.containers),
            self.registry.clone(),
            self.config.broadcast_interval(),
        )
    }
}
