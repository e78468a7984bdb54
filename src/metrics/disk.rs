// Disk metric family
//
// Collects usage for every mounted filesystem, sums them into totals and
// picks out the root filesystem for the dashboard's headline figure.

use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use tracing::debug;

use super::calculate_percentage;

/// One mounted filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskEntry {
    /// Device name (e.g., "/dev/sda1")
    pub name: String,

    /// Where this disk is mounted (e.g., "/", "/home")
    pub mount_point: String,

    /// Filesystem type (e.g., "ext4", "xfs", "apfs")
    pub filesystem: String,

    pub total_bytes: u64,

    pub used_bytes: u64,

    /// May be less than (total - used) due to reserved blocks
    pub available_bytes: u64,

    pub used_percent: f64,

    pub removable: bool,
}

/// Sum of all filesystems
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskTotals {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f64,
}

/// Disk usage snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskInfo {
    pub disks: Vec<DiskEntry>,
    pub totals: DiskTotals,

    /// The "/" mount if present, else the first filesystem
    pub root: Option<DiskEntry>,
}

impl DiskEntry {
    pub fn new(
        name: String,
        mount_point: String,
        filesystem: String,
        total: u64,
        available: u64,
        removable: bool,
    ) -> Self {
        let used = total.saturating_sub(available);
        DiskEntry {
            name,
            mount_point,
            filesystem,
            total_bytes: total,
            used_bytes: used,
            available_bytes: available,
            used_percent: calculate_percentage(used, total),
            removable,
        }
    }
}

impl DiskInfo {
    /// Builds totals and root selection from per-filesystem entries
    pub fn from_entries(disks: Vec<DiskEntry>) -> Self {
        let (total, used, available) = disks.iter().fold((0u64, 0u64, 0u64), |acc, d| {
            (
                acc.0.saturating_add(d.total_bytes),
                acc.1.saturating_add(d.used_bytes),
                acc.2.saturating_add(d.available_bytes),
            )
        });

        let root = disks
            .iter()
            .find(|d| d.mount_point == "/")
            .or_else(|| disks.first())
            .cloned();

        DiskInfo {
            totals: DiskTotals {
                total_bytes: total,
                used_bytes: used,
                available_bytes: available,
                used_percent: calculate_percentage(used, total),
            },
            root,
            disks,
        }
    }
}

/// Samples every mounted filesystem (blocking)
pub fn sample() -> DiskInfo {
    debug!("Collecting disk space metrics");

    let disks = Disks::new_with_refreshed_list();

    let entries: Vec<DiskEntry> = disks
        .list()
        .iter()
        .map(|disk| {
            DiskEntry::new(
                disk.name().to_string_lossy().to_string(),
                disk.mount_point().to_string_lossy().to_string(),
                disk.file_system().to_string_lossy().to_string(),
                disk.total_space(),
                disk.available_space(),
                disk.is_removable(),
            )
        })
        .collect();

    debug!("Collected information for {} disk(s)", entries.len());

    DiskInfo::from_entries(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mount: &str, total: u64, available: u64) -> DiskEntry {
        DiskEntry::new("dev".into(), mount.into(), "ext4".into(), total, available, false)
    }

    #[test]
    fn test_root_prefers_slash_mount() {
        let info = DiskInfo::from_entries(vec![entry("/boot", 100, 50), entry("/", 1000, 250)]);
        let root = info.root.unwrap();
        assert_eq!(root.mount_point, "/");
        assert_eq!(root.used_percent, 75.0);
    }

    #[test]
    fn test_root_falls_back_to_first() {
        let info = DiskInfo::from_entries(vec![entry("/data", 100, 50), entry("/mnt", 10, 5)]);
        assert_eq!(info.root.unwrap().mount_point, "/data");
    }

    #[test]
    fn test_totals_sum_devices() {
        let info = DiskInfo::from_entries(vec![entry("/", 1000, 400), entry("/data", 1000, 600)]);
        assert_eq!(info.totals.total_bytes, 2000);
        assert_eq!(info.totals.used_bytes, 1000);
        assert_eq!(info.totals.used_percent, 50.0);
    }

    #[test]
    fn test_no_disks_is_zeroed() {
        let info = DiskInfo::from_entries(Vec::new());
        assert!(info.root.is_none());
        assert_eq!(info.totals, DiskTotals::default());
    }
}
