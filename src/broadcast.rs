// Broadcast module - periodic push of metrics to WebSocket subscribers
//
// A single Tokio task owns the timer. On every tick it polls the metric
// sources directly (the cache serves HTTP requests only), serializes one
// envelope and hands it to every registered subscriber.
//
// # Failure Handling
// - No subscribers: the tick is skipped without polling anything
// - A failing metric family degrades to empty data; the tick still goes out
// - A failing subscriber is pruned; the others are unaffected
// - Nothing here ends the loop except cancellation

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{
    now_iso, ContainerMetrics, ContainerSummary, DockerSnapshot, HostMetrics, MetricsSnapshot,
    SystemOverview,
};
use crate::registry::{Outbound, SubscriberRegistry};

/// Message type of the periodic push
pub const METRICS_UPDATE: &str = "metrics_update";

/// Wire format of every push message
///
/// # Example
/// ```json
/// {
///   "type": "metrics_update",
///   "timestamp": "2024-01-15T10:30:00.000Z",
///   "data": { "system": { ... }, "docker": { ... } }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(kind: &str, data: T) -> Self {
        Envelope {
            kind: kind.to_string(),
            timestamp: now_iso(),
            data,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody was listening, nothing was polled
    Skipped,

    Sent { delivered: usize, pruned: usize },
}

/// Periodic metrics broadcaster
///
/// Cheap to clone; all clones share the same sources and registry.
#[derive(Clone)]
pub struct Broadcaster {
    host: Arc<dyn HostMetrics>,
    containers: Arc<dyn ContainerMetrics>,
    registry: SubscriberRegistry,
    period: Duration,
}

impl Broadcaster {
    /// Creates a broadcaster
    ///
    /// # Arguments
    /// * `host` - Host metrics source
    /// * `containers` - Container metrics source
    /// * `registry` - Subscribers to push to
    /// * `period` - Time between ticks
    pub fn new(
        host: Arc<dyn HostMetrics>,
        containers: Arc<dyn ContainerMetrics>,
        registry: SubscriberRegistry,
        period: Duration,
    ) -> Self {
        Broadcaster {
            host,
            containers,
            registry,
            period,
        }
    }

    /// Polls every source and assembles a snapshot
    ///
    /// Never fails: each family falls back to its empty form on error.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let (system, docker) = tokio::join!(self.system_section(), self.docker_section());
        MetricsSnapshot { system, docker }
    }

    async fn system_section(&self) -> SystemOverview {
        match self.host.overview().await {
            Ok(overview) => overview,
            Err(e) => {
                warn!("System metrics unavailable for broadcast: {}", e);
                SystemOverview {
                    timestamp: now_iso(),
                    ..Default::default()
                }
            }
        }
    }

    async fn docker_section(&self) -> DockerSnapshot {
        if !self.containers.is_available() {
            return DockerSnapshot::default();
        }

        let containers = match self.containers.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!("Container metrics unavailable for broadcast: {}", e);
                return DockerSnapshot::default();
            }
        };

        // Stats for running containers are fetched concurrently; each call is
        // already bounded by the adapter timeout
        let running: Vec<&ContainerSummary> =
            containers.iter().filter(|c| c.state == "running").collect();
        let results = join_all(
            running
                .iter()
                .map(|c| self.containers.container_stats(&c.id)),
        )
        .await;

        let stats = results
            .into_iter()
            .zip(running.iter())
            .filter_map(|(result, container)| match result {
                Ok(stats) => Some(stats),
                Err(e) => {
                    // Continue with other containers even if one fails
                    warn!("Failed to get stats for container {}: {}", container.name, e);
                    None
                }
            })
            .collect();

        DockerSnapshot {
            available: true,
            containers,
            stats,
        }
    }

    /// Runs one broadcast cycle
    pub async fn tick(&self) -> TickOutcome {
        if self.registry.is_empty() {
            debug!("No subscribers, skipping broadcast");
            return TickOutcome::Skipped;
        }

        let envelope = Envelope::new(METRICS_UPDATE, self.snapshot().await);
        let message: Outbound = match serde_json::to_string(&envelope) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!("Failed to serialize metrics update: {}", e);
                return TickOutcome::Skipped;
            }
        };

        let outcome = self.registry.broadcast(&message);

        debug!(
            "Broadcast metrics to {} subscriber(s), pruned {}",
            outcome.delivered, outcome.pruned
        );

        TickOutcome::Sent {
            delivered: outcome.delivered,
            pruned: outcome.pruned,
        }
    }

    /// Spawns the broadcast loop
    ///
    /// Each tick runs to completion before the next one is scheduled, and a
    /// tick in progress when `cancel` fires is allowed to finish.
    ///
    /// # Returns
    /// Handle to join on shutdown
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting broadcast loop (every {}s)", self.period.as_secs());

            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                if let TickOutcome::Sent { pruned, .. } = self.tick().await {
                    if pruned > 0 {
                        info!(
                            "Removed {} disconnected subscriber(s), {} remaining",
                            pruned,
                            self.registry.len()
                        );
                    }
                }
            }

            info!("Broadcast loop stopped");
        })
    }
}
