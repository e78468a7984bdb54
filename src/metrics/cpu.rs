// CPU metric family
//
// Collects overall and per-core CPU usage plus system load average.
// Usage needs two samples separated by sysinfo's minimum update interval,
// so sampling blocks for a short moment and must run off the async runtime.

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

use super::round2;

/// Load average over 1, 5 and 15 minutes
///
/// # Interpretation
/// - Values < number of CPU cores = system not overloaded
/// - Values > number of CPU cores = system is experiencing high load
///
/// Always 0.0 on Windows, where load average does not exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// CPU usage snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuInfo {
    /// Usage across all cores, 0-100
    pub usage_percent: f64,

    /// Logical core count
    pub core_count: usize,

    pub physical_core_count: usize,

    /// Usage of each logical core, 0-100
    pub per_core_percent: Vec<f64>,

    pub brand: String,

    pub frequency_mhz: u64,

    pub load_average: LoadAverage,
}

/// Reads the current load average
pub fn load_average() -> LoadAverage {
    let load = System::load_average();
    LoadAverage {
        one: round2(load.one),
        five: round2(load.five),
        fifteen: round2(load.fifteen),
    }
}

/// Samples CPU usage (blocking)
///
/// Takes two readings `MINIMUM_CPU_UPDATE_INTERVAL` apart, since a single
/// reading has no baseline to compute usage against.
pub fn sample() -> CpuInfo {
    debug!("Collecting CPU metrics");

    let mut sys =
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()));
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();

    let cpus = sys.cpus();
    let per_core_percent: Vec<f64> = cpus.iter().map(|c| round2(c.cpu_usage() as f64)).collect();
    let brand = cpus
        .first()
        .map(|c| c.brand().trim().to_string())
        .unwrap_or_default();
    let frequency_mhz = cpus.first().map(|c| c.frequency()).unwrap_or(0);

    let info = CpuInfo {
        usage_percent: round2(sys.global_cpu_info().cpu_usage() as f64),
        core_count: if cpus.is_empty() { num_cpus::get() } else { cpus.len() },
        physical_core_count: num_cpus::get_physical(),
        per_core_percent,
        brand,
        frequency_mhz,
        load_average: load_average(),
    };

    debug!(
        "CPU: {:.2}% across {} core(s), load 1min={:.2}",
        info.usage_percent, info.core_count, info.load_average.one
    );

    info
}
