// Memory metric family
//
// Collects system memory usage metrics including RAM and swap.
// Byte counts are reported as-is; the dashboard formats them.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use super::calculate_percentage;

/// Memory usage snapshot
///
/// # Platform Support
/// - Linux: Full support via /proc/meminfo
/// - macOS: Full support via vm_stat
/// - Windows: Full support via GlobalMemoryStatusEx
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryInfo {
    /// Total physical RAM installed
    pub total_bytes: u64,

    /// Memory currently in use
    pub used_bytes: u64,

    /// Memory available for new applications
    /// Includes free memory + reclaimable cache
    pub available_bytes: u64,

    /// Memory completely unused
    /// Typically lower than available_bytes on Linux due to caching
    pub free_bytes: u64,

    pub used_percent: f64,

    pub swap_total_bytes: u64,

    /// High values indicate memory pressure
    pub swap_used_bytes: u64,

    pub swap_free_bytes: u64,

    pub swap_used_percent: f64,
}

impl MemoryInfo {
    /// Builds a snapshot from raw byte counts
    pub fn from_raw(
        total: u64,
        used: u64,
        available: u64,
        free: u64,
        swap_total: u64,
        swap_used: u64,
    ) -> Self {
        MemoryInfo {
            total_bytes: total,
            used_bytes: used,
            available_bytes: available,
            free_bytes: free,
            used_percent: calculate_percentage(used, total),
            swap_total_bytes: swap_total,
            swap_used_bytes: swap_used,
            swap_free_bytes: swap_total.saturating_sub(swap_used),
            swap_used_percent: calculate_percentage(swap_used, swap_total),
        }
    }
}

/// Samples memory usage (blocking)
pub fn sample() -> MemoryInfo {
    debug!("Collecting memory metrics");

    let mut sys = System::new();
    sys.refresh_memory();

    let info = MemoryInfo::from_raw(
        sys.total_memory(),
        sys.used_memory(),
        sys.available_memory(),
        sys.free_memory(),
        sys.total_swap(),
        sys.used_swap(),
    );

    debug!(
        "Memory: {}/{} bytes ({:.2}%), Swap: {:.2}%",
        info.used_bytes, info.total_bytes, info.used_percent, info.swap_used_percent
    );

    info
}
