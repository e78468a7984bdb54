// Metrics module - defines the seams between the bridge and its metric sources
//
// Host metrics and container metrics are each reached through a trait, so the
// HTTP handlers and the broadcast loop receive whichever implementation was
// constructed at startup (live sources in production, fakes in tests).

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cpu;
pub mod disk;
pub mod docker;
pub mod host;
pub mod memory;
pub mod network;

#[cfg(test)]
pub mod fake;

pub use cpu::CpuInfo;
pub use disk::DiskInfo;
pub use docker::{ContainerLogs, ContainerStats, ContainerSummary, DockerAdapter};
pub use host::{SysinfoHost, SystemOverview};
pub use memory::MemoryInfo;
pub use network::NetworkInfo;

/// Errors a metrics source can report
///
/// Callers decide how to degrade: the broadcast loop substitutes empty data
/// for every variant, HTTP handlers map each variant to a status code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    #[error("{0} source is unavailable")]
    Unavailable(&'static str),

    #[error("{0} collection timed out")]
    Timeout(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Source error: {0}")]
    Source(String),
}

/// Host-level metric families
///
/// # Design Philosophy
/// - **Async-first**: implementations must not block the Tokio runtime
/// - **Bounded**: every call finishes within the configured adapter timeout
/// - **Stateless**: each call is a fresh read; nothing is retried
#[async_trait]
pub trait HostMetrics: Send + Sync {
    /// Aggregate of every host family
    async fn overview(&self) -> Result<SystemOverview, CollectError>;

    async fn cpu(&self) -> Result<CpuInfo, CollectError>;

    async fn memory(&self) -> Result<MemoryInfo, CollectError>;

    async fn disk(&self) -> Result<DiskInfo, CollectError>;

    async fn network(&self) -> Result<NetworkInfo, CollectError>;
}

/// Container runtime metric families
#[async_trait]
pub trait ContainerMetrics: Send + Sync {
    /// Whether a container runtime was found at startup
    fn is_available(&self) -> bool;

    /// All containers, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, CollectError>;

    /// Point-in-time resource usage for one container
    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError>;

    /// Recent log lines for one container
    async fn container_logs(&self, id: &str, query: &LogQuery)
        -> Result<ContainerLogs, CollectError>;
}

/// Default number of log lines returned
pub const DEFAULT_LOG_LINES: u32 = 100;

/// Upper bound on requested log lines
pub const MAX_LOG_LINES: u32 = 10_000;

/// Filters for a container log request
///
/// `since` and `until` are Unix timestamps in seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogQuery {
    pub lines: Option<u32>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl LogQuery {
    pub fn lines(&self) -> u32 {
        self.lines.unwrap_or(DEFAULT_LOG_LINES)
    }

    pub fn validate(&self) -> Result<(), CollectError> {
        let lines = self.lines();
        if lines == 0 || lines > MAX_LOG_LINES {
            return Err(CollectError::InvalidRequest(format!(
                "lines must be between 1 and {MAX_LOG_LINES}"
            )));
        }
        if matches!(self.since, Some(s) if s < 0) || matches!(self.until, Some(u) if u < 0) {
            return Err(CollectError::InvalidRequest(
                "since/until must be non-negative Unix timestamps".to_string(),
            ));
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if until < since {
                return Err(CollectError::InvalidRequest(
                    "until must not be earlier than since".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Message pushed to every subscriber on each broadcast tick
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub system: SystemOverview,
    pub docker: DockerSnapshot,
}

/// Container section of a [`MetricsSnapshot`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DockerSnapshot {
    pub available: bool,
    pub containers: Vec<ContainerSummary>,
    pub stats: Vec<ContainerStats>,
}

/// Rounds to two decimal places
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// Calculates `used / total` as a percentage, 0 when `total` is 0
pub fn calculate_percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2((used as f64 / total as f64) * 100.0)
    }
}

/// Current UTC time as an ISO-8601 string
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
