// Test doubles for the metrics traits, with call counters

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{
    CollectError, ContainerLogs, ContainerMetrics, ContainerStats, ContainerSummary, CpuInfo,
    DiskInfo, HostMetrics, LogQuery, MemoryInfo, NetworkInfo, SystemOverview,
};

/// Host source returning fixed data, or a chosen error once `fail_with` is set
#[derive(Default)]
pub struct FakeHost {
    pub calls: AtomicUsize,
    pub fail_with: std::sync::Mutex<Option<CollectError>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(err: CollectError) -> Self {
        FakeHost {
            calls: AtomicUsize::new(0),
            fail_with: std::sync::Mutex::new(Some(err)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) -> Result<(), CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn overview_fixture(&self) -> SystemOverview {
        SystemOverview {
            hostname: "edge-01".to_string(),
            uptime_secs: 3600,
            cpu: CpuInfo {
                usage_percent: 12.5,
                core_count: 4,
                ..Default::default()
            },
            memory: MemoryInfo::from_raw(1000, 500, 500, 400, 0, 0),
            // Distinct per call so cache hits are observable
            timestamp: format!("call-{}", self.calls()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl HostMetrics for FakeHost {
    async fn overview(&self) -> Result<SystemOverview, CollectError> {
        self.record()?;
        Ok(self.overview_fixture())
    }

    async fn cpu(&self) -> Result<CpuInfo, CollectError> {
        self.record()?;
        Ok(self.overview_fixture().cpu)
    }

    async fn memory(&self) -> Result<MemoryInfo, CollectError> {
        self.record()?;
        Ok(self.overview_fixture().memory)
    }

    async fn disk(&self) -> Result<DiskInfo, CollectError> {
        self.record()?;
        Ok(DiskInfo::default())
    }

    async fn network(&self) -> Result<NetworkInfo, CollectError> {
        self.record()?;
        Ok(NetworkInfo::default())
    }
}

/// Container source with one running container, or failing every call
pub struct FakeContainers {
    pub calls: AtomicUsize,
    pub available: AtomicBool,
    pub fail: AtomicBool,
}

impl FakeContainers {
    pub fn new() -> Self {
        FakeContainers {
            calls: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let fake = Self::new();
        fake.fail.store(true, Ordering::SeqCst);
        fake
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) -> Result<(), CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollectError::Source("daemon connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerMetrics for FakeContainers {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, CollectError> {
        self.record()?;
        Ok(vec![ContainerSummary {
            id: "0123456789ab".to_string(),
            name: "web".to_string(),
            state: "running".to_string(),
            ..Default::default()
        }])
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError> {
        self.record()?;
        if id == "missing" {
            return Err(CollectError::NotFound(format!("No such container: {id}")));
        }
        Ok(ContainerStats {
            id: id.to_string(),
            name: "web".to_string(),
            cpu_percent: 80.0,
            ..Default::default()
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        query: &LogQuery,
    ) -> Result<ContainerLogs, CollectError> {
        query.validate()?;
        self.record()?;
        let lines = (0..query.lines().min(3)).map(|i| format!("line {i}")).collect();
        Ok(ContainerLogs::new(id, lines))
    }
}
