// Host metrics adapter backed by sysinfo
//
// sysinfo reads are synchronous (and CPU sampling sleeps between readings),
// so each family runs on Tokio's blocking pool under the adapter timeout.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::cpu::{self, CpuInfo};
use super::disk::{self, DiskInfo, DiskTotals};
use super::memory::{self, MemoryInfo};
use super::network::{self, NetworkInfo, NetworkTotals};
use super::{now_iso, CollectError, HostMetrics};

/// Aggregate of every host family, as served by `/api/system/overview`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemOverview {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub uptime_secs: u64,

    /// ISO-8601 boot time
    pub boot_time: String,

    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disk: DiskTotals,

    /// Used percentage of the root filesystem
    pub root_disk_percent: f64,

    pub network: NetworkTotals,
    pub timestamp: String,
}

impl SystemOverview {
    /// Combines family snapshots with static host information
    pub fn assemble(cpu: CpuInfo, memory: MemoryInfo, disk: DiskInfo, network: NetworkInfo) -> Self {
        let boot_time = DateTime::<Utc>::from_timestamp(System::boot_time() as i64, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        SystemOverview {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os_name: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            uptime_secs: System::uptime(),
            boot_time,
            cpu,
            memory,
            root_disk_percent: disk.root.as_ref().map(|r| r.used_percent).unwrap_or(0.0),
            disk: disk.totals,
            network: network.totals,
            timestamp: now_iso(),
        }
    }
}

/// Live host metrics
pub struct SysinfoHost {
    /// Upper bound for one family read
    timeout: Duration,

    /// Completion flag of the last read that timed out, per family
    stalled: DashMap<&'static str, Arc<AtomicBool>>,
}

impl SysinfoHost {
    pub fn new(timeout: Duration) -> Self {
        SysinfoHost {
            timeout,
            stalled: DashMap::new(),
        }
    }

    /// Runs a blocking sysinfo read under the adapter timeout
    ///
    /// A timed-out read cannot be cancelled and keeps its blocking thread.
    /// Until it finishes, further reads of the same family fail at once with
    /// `Timeout` instead of queueing another thread behind it.
    async fn read<T, F>(&self, family: &'static str, f: F) -> Result<T, CollectError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if let Some(done) = self.stalled.get(family).map(|d| Arc::clone(d.value())) {
            if !done.load(Ordering::Acquire) {
                debug!("{} sampling still stuck, failing fast", family);
                return Err(CollectError::Timeout(family));
            }
            self.stalled.remove_if(family, |_, d| d.load(Ordering::Acquire));
        }

        let done = Arc::new(AtomicBool::new(false));
        let finished = Arc::clone(&done);
        let task = tokio::task::spawn_blocking(move || {
            let value = f();
            finished.store(true, Ordering::Release);
            value
        });

        match timeout(self.timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("{} sampling task failed: {}", family, e);
                Err(CollectError::Source(format!("{family} sampling failed: {e}")))
            }
            Err(_) => {
                warn!("{} sampling exceeded {:?}", family, self.timeout);
                self.stalled.insert(family, done);
                Err(CollectError::Timeout(family))
            }
        }
    }
}

#[async_trait]
impl HostMetrics for SysinfoHost {
    async fn overview(&self) -> Result<SystemOverview, CollectError> {
        self.read("system", || {
            SystemOverview::assemble(cpu::sample(), memory::sample(), disk::sample(), network::sample())
        })
        .await
    }

    async fn cpu(&self) -> Result<CpuInfo, CollectError> {
        self.read("cpu", cpu::sample).await
    }

    async fn memory(&self) -> Result<MemoryInfo, CollectError> {
        self.read("memory", memory::sample).await
    }

    async fn disk(&self) -> Result<DiskInfo, CollectError> {
        self.read("disk", disk::sample).await
    }

    async fn network(&self) -> Result<NetworkInfo, CollectError> {
        self.read("network", network::sample).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_memory_is_consistent() {
        let host = SysinfoHost::new(Duration::from_secs(5));
        let memory = host.memory().await.unwrap();
        assert!(memory.used_percent >= 0.0 && memory.used_percent <= 100.0);
    }

    #[tokio::test]
    async fn test_slow_read_times_out() {
        let host = SysinfoHost::new(Duration::from_millis(10));
        let result = host
            .read("slow", || std::thread::sleep(Duration::from_millis(200)))
            .await;
        assert_eq!(result, Err(CollectError::Timeout("slow")));
    }

    #[tokio::test]
    async fn test_stuck_family_fails_fast_until_read_finishes() {
        let host = SysinfoHost::new(Duration::from_millis(100));
        let first = host
            .read("disk", || std::thread::sleep(Duration::from_millis(500)))
            .await;
        assert_eq!(first, Err(CollectError::Timeout("disk")));

        // While the first read is stuck, no new blocking read is started
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let second = host.read("disk", move || flag.store(true, Ordering::SeqCst)).await;
        assert_eq!(second, Err(CollectError::Timeout("disk")));
        assert!(!ran.load(Ordering::SeqCst));

        // Other families are unaffected
        assert_eq!(host.read("memory", || 7u8).await, Ok(7));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(host.read("disk", || 1u8).await, Ok(1));
    }
}
