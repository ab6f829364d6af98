//! RAM and storage counters

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// RAM information, in GB rounded to two decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamSpec {
    pub total_gb: f64,
    pub available_gb: f64,
}

impl RamSpec {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        RamSpec {
            total_gb: bytes_to_gb(sys.total_memory()),
            available_gb: bytes_to_gb(sys.available_memory()),
        }
    }
}

/// Free space on the system volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskSpace {
    Free(f64),
    Unknown,
}

impl DiskSpace {
    /// Free space of the disk mounted closest to `volume`.
    pub fn detect(volume: &Path) -> Self {
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()));

        match free_bytes_for(volume, mounts) {
            Some(bytes) => {
                debug!(volume = %volume.display(), bytes, "system volume found");
                DiskSpace::Free(bytes_to_gb(bytes))
            }
            None => {
                warn!(volume = %volume.display(), "no disk found for system volume");
                DiskSpace::Unknown
            }
        }
    }
}

impl fmt::Display for DiskSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskSpace::Free(gb) => write!(f, "{} GB", gb),
            DiskSpace::Unknown => write!(f, "Unknown"),
        }
    }
}

// JSON shape: a number of GB, or the string "Unknown".
impl Serialize for DiskSpace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DiskSpace::Free(gb) => serializer.serialize_f64(*gb),
            DiskSpace::Unknown => serializer.serialize_str("Unknown"),
        }
    }
}

/// Longest mount point that is a prefix of `volume` wins.
fn free_bytes_for(volume: &Path, mounts: impl Iterator<Item = (PathBuf, u64)>) -> Option<u64> {
    mounts
        .filter(|(mount, _)| volume.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, available)| available)
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(15.456), 15.46);
        assert_eq!(bytes_to_gb(16 * 1024 * 1024 * 1024), 16.0);
        assert_eq!(bytes_to_gb(1_500_000_000), 1.4);
        assert_eq!(bytes_to_gb(0), 0.0);
    }

    #[test]
    fn deepest_mount_point_is_used() {
        let mounts = vec![
            (PathBuf::from("/"), 10),
            (PathBuf::from("/home"), 20),
            (PathBuf::from("/boot/efi"), 30),
        ];
        assert_eq!(free_bytes_for(Path::new("/"), mounts.clone().into_iter()), Some(10));
        assert_eq!(
            free_bytes_for(Path::new("/home/user"), mounts.into_iter()),
            Some(20)
        );
    }

    #[test]
    fn no_matching_mount_is_none() {
        let mounts = vec![(PathBuf::from("/mnt/data"), 10)];
        assert_eq!(free_bytes_for(Path::new("/"), mounts.into_iter()), None);
    }

    #[test]
    fn disk_space_renders_sentinel() {
        assert_eq!(DiskSpace::Free(120.5).to_string(), "120.5 GB");
        assert_eq!(DiskSpace::Unknown.to_string(), "Unknown");
        assert_eq!(serde_json::to_string(&DiskSpace::Unknown).unwrap(), "\"Unknown\"");
        assert_eq!(serde_json::to_string(&DiskSpace::Free(2.25)).unwrap(), "2.25");
    }
}
