// Docker metrics adapter
//
// Whether Docker is reachable is decided once at startup by a capability
// probe. When it is not, the adapter is the `Unavailable` variant and every
// call returns empty data, so the rest of the bridge never has to care.

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogsOptions, Stats, StatsOptions};
use bollard::models::ContainerSummary as DockerContainerSummary;
use bollard::Docker;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{now_iso, round2, CollectError, ContainerMetrics, LogQuery};

/// One container, running or not
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerSummary {
    /// Short (12 character) container id
    pub id: String,

    /// Container name without the leading slash
    pub name: String,

    pub image: String,

    /// e.g. "running", "exited"
    pub state: String,

    /// Human readable status, e.g. "Up 2 hours"
    pub status: String,

    /// ISO-8601 creation time
    pub created: String,

    /// Published ports, e.g. "0.0.0.0:8080->80/tcp"
    pub ports: Vec<String>,
}

/// Resource usage of one container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerStats {
    pub id: String,
    pub name: String,

    /// CPU usage as percentage of one core
    /// e.g., 200% means two cores fully busy
    pub cpu_percent: f64,

    /// Current memory usage, page cache excluded
    pub memory_usage_bytes: u64,

    /// Memory limit configured for the container
    pub memory_limit_bytes: u64,

    /// Memory usage as percentage of limit
    pub memory_percent: f64,

    /// Bytes received over all interfaces
    pub network_rx_bytes: u64,

    /// Bytes transmitted over all interfaces
    pub network_tx_bytes: u64,

    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub pids: u64,
    pub timestamp: String,
}

impl ContainerStats {
    /// Zeroed stats for a container whose runtime is unavailable
    pub fn empty(id: &str) -> Self {
        ContainerStats {
            id: short_id(id),
            timestamp: now_iso(),
            ..Default::default()
        }
    }
}

/// Recent log output of one container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerLogs {
    pub id: String,
    pub lines: Vec<String>,
    pub count: usize,
}

impl ContainerLogs {
    pub fn new(id: &str, lines: Vec<String>) -> Self {
        ContainerLogs {
            id: short_id(id),
            count: lines.len(),
            lines,
        }
    }

    pub fn empty(id: &str) -> Self {
        Self::new(id, Vec::new())
    }
}

/// Container metrics source
///
/// # Requirements
/// - Docker daemon must be running when the bridge starts
/// - User must have permissions to access the Docker socket
/// - Default socket: unix:///var/run/docker.sock (Linux/macOS)
/// - Default socket: npipe:////./pipe/docker_engine (Windows)
pub enum DockerAdapter {
    /// Backed by a live daemon connection
    Available { docker: Docker, timeout: Duration },

    /// No daemon found at startup; always returns empty data
    Unavailable,
}

impl DockerAdapter {
    /// Connects to Docker and checks that the daemon answers
    ///
    /// # Arguments
    /// * `timeout` - Upper bound for the probe and for every later call
    ///
    /// # Returns
    /// `Available` if a ping succeeds within `timeout`, else `Unavailable`
    pub async fn probe(timeout_after: Duration) -> Self {
        // Checks DOCKER_HOST first, falling back to the platform socket
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => docker,
            Err(e) => {
                warn!("Docker client could not be created: {}", e);
                return DockerAdapter::Unavailable;
            }
        };

        match timeout(timeout_after, docker.ping()).await {
            Ok(Ok(_)) => {
                info!("Docker daemon detected, container metrics enabled");
                DockerAdapter::Available {
                    docker,
                    timeout: timeout_after,
                }
            }
            Ok(Err(e)) => {
                warn!(
                    "Docker daemon not reachable ({}), container metrics will be empty. \
                     Ensure Docker is running and this process can access the Docker socket.",
                    e
                );
                DockerAdapter::Unavailable
            }
            Err(_) => {
                warn!("Docker ping timed out after {:?}, container metrics will be empty", timeout_after);
                DockerAdapter::Unavailable
            }
        }
    }
}

/// Awaits a Docker call under the adapter timeout
async fn bounded<T, F>(limit: Duration, what: &'static str, call: F) -> Result<T, CollectError>
where
    F: Future<Output = Result<T, bollard::errors::Error>>,
{
    match timeout(limit, call).await {
        Ok(result) => result.map_err(map_docker_error),
        Err(_) => {
            warn!("Docker {} exceeded {:?}", what, limit);
            Err(CollectError::Timeout("docker"))
        }
    }
}

fn map_docker_error(err: bollard::errors::Error) -> CollectError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => CollectError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 400,
            message,
        } => CollectError::InvalidRequest(message),
        other if daemon_gone(&other) => {
            warn!("Docker daemon went away: {}", other);
            CollectError::Unavailable("docker")
        }
        other => {
            warn!("Docker request failed: {}", other);
            CollectError::Source(other.to_string())
        }
    }
}

/// Whether the error chain bottoms out in a refused or missing socket
fn daemon_gone(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
            );
        }
        current = e.source();
    }
    false
}

#[async_trait]
impl ContainerMetrics for DockerAdapter {
    fn is_available(&self) -> bool {
        matches!(self, DockerAdapter::Available { .. })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, CollectError> {
        let DockerAdapter::Available { docker, timeout } = self else {
            return Ok(Vec::new());
        };

        debug!("Listing Docker containers");

        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = bounded(*timeout, "container list", docker.list_containers(Some(options))).await?;

        debug!("Found {} container(s)", containers.len());

        Ok(containers.into_iter().map(summarize).collect())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError> {
        let DockerAdapter::Available { docker, timeout } = self else {
            return Ok(ContainerStats::empty(id));
        };

        debug!("Collecting stats for container: {}", id);

        // Single snapshot, not a continuous stream
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(docker.stats(id, Some(options)));

        let stats = bounded(*timeout, "container stats", async {
            match stream.next().await {
                Some(result) => result,
                None => Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message: format!("no stats returned for container {id}"),
                }),
            }
        })
        .await?;

        let result = stats_from_docker(&stats);

        debug!(
            "Container {}: CPU={:.2}%, Mem={}/{} ({:.2}%)",
            result.name,
            result.cpu_percent,
            result.memory_usage_bytes,
            result.memory_limit_bytes,
            result.memory_percent
        );

        Ok(result)
    }

    async fn container_logs(&self, id: &str, query: &LogQuery) -> Result<ContainerLogs, CollectError> {
        query.validate()?;

        let DockerAdapter::Available { docker, timeout } = self else {
            return Ok(ContainerLogs::empty(id));
        };

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: query.lines().to_string(),
            since: query.since.unwrap_or(0),
            until: query.until.unwrap_or(0),
            ..Default::default()
        };

        let mut stream = Box::pin(docker.logs(id, Some(options)));
        let max_lines = query.lines() as usize;

        let lines = bounded(*timeout, "container logs", async {
            let mut lines = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                lines.extend(chunk.to_string().lines().map(str::to_string));
            }
            Ok::<_, bollard::errors::Error>(lines)
        })
        .await?;

        let skip = lines.len().saturating_sub(max_lines);
        Ok(ContainerLogs::new(id, lines.into_iter().skip(skip).collect()))
    }
}

/// Shortens a container id to the 12 characters Docker shows by default
pub fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

/// Checks that `id` looks like a container id or name
///
/// Docker accepts names of `[a-zA-Z0-9][a-zA-Z0-9_.-]*`; ids are hex.
pub fn is_valid_container_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    id.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn summarize(container: DockerContainerSummary) -> ContainerSummary {
    let id = container.id.unwrap_or_default();
    let name = container
        .names
        .and_then(|names| names.first().map(|n| n.trim_start_matches('/').to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let created = container
        .created
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    let ports = container
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| {
            let proto = p.typ.map(|t| t.to_string()).unwrap_or_else(|| "tcp".to_string());
            match p.public_port {
                Some(public) => format!(
                    "{}:{}->{}/{}",
                    p.ip.unwrap_or_else(|| "0.0.0.0".to_string()),
                    public,
                    p.private_port,
                    proto
                ),
                None => format!("{}/{}", p.private_port, proto),
            }
        })
        .collect();

    ContainerSummary {
        id: short_id(&id),
        name,
        image: container.image.unwrap_or_default(),
        state: container.state.unwrap_or_default(),
        status: container.status.unwrap_or_default(),
        created,
        ports,
    }
}

/// Calculates container CPU usage
///
/// Docker provides cumulative CPU usage in nanoseconds, so usage is derived
/// from the change since the previous sample.
///
/// # Formula
/// cpu_percent = (cpu_delta / system_cpu_delta) * online_cpus * 100.0
///
/// Returns 0 when either delta is not positive.
pub fn calculate_cpu_percent(cpu_delta: f64, system_delta: f64, online_cpus: f64) -> f64 {
    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        return 0.0;
    }
    round2((cpu_delta / system_delta) * online_cpus * 100.0)
}

fn cpu_percent_from_stats(stats: &Stats) -> f64 {
    let cpu_delta =
        stats.cpu_stats.cpu_usage.total_usage as f64 - stats.precpu_stats.cpu_usage.total_usage as f64;

    let system_cpu = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64;
    let presystem_cpu = stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;

    let online_cpus = stats
        .cpu_stats
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or_else(|| num_cpus::get() as u64) as f64;

    calculate_cpu_percent(cpu_delta, system_cpu - presystem_cpu, online_cpus)
}

/// Memory in use, excluding page cache the kernel can reclaim
fn memory_usage_from_stats(stats: &Stats) -> u64 {
    use bollard::container::MemoryStatsStats;

    let usage = stats.memory_stats.usage.unwrap_or(0);
    let cache = match &stats.memory_stats.stats {
        Some(MemoryStatsStats::V1(v1)) => v1.cache,
        Some(MemoryStatsStats::V2(v2)) => v2.inactive_file,
        None => 0,
    };
    usage.saturating_sub(cache)
}

fn stats_from_docker(stats: &Stats) -> ContainerStats {
    let memory_usage = memory_usage_from_stats(stats);
    let memory_limit = stats.memory_stats.limit.unwrap_or(0);
    let memory_percent = if memory_limit > 0 {
        round2((memory_usage as f64 / memory_limit as f64) * 100.0)
    } else {
        0.0
    };

    // Sum all network interfaces
    let (network_rx, network_tx) = stats
        .networks
        .as_ref()
        .map(|networks| {
            networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                (rx.saturating_add(net.rx_bytes), tx.saturating_add(net.tx_bytes))
            })
        })
        .unwrap_or((0, 0));

    let (block_read, block_write) = stats
        .blkio_stats
        .io_service_bytes_recursive
        .as_ref()
        .map(|entries| {
            entries.iter().fold((0u64, 0u64), |(read, write), entry| {
                match entry.op.as_str() {
                    "read" | "Read" => (read.saturating_add(entry.value), write),
                    "write" | "Write" => (read, write.saturating_add(entry.value)),
                    _ => (read, write),
                }
            })
        })
        .unwrap_or((0, 0));

    ContainerStats {
        id: short_id(&stats.id),
        name: stats.name.trim_start_matches('/').to_string(),
        cpu_percent: cpu_percent_from_stats(stats),
        memory_usage_bytes: memory_usage,
        memory_limit_bytes: memory_limit,
        memory_percent,
        network_rx_bytes: network_rx,
        network_tx_bytes: network_tx,
        block_read_bytes: block_read,
        block_write_bytes: block_write,
        pids: stats.pids_stats.current.unwrap_or(0),
        timestamp: now_iso(),
    }
}
