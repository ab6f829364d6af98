//! System information aggregator

use serde::Serialize;
use sysinfo::System;

use super::cpu::CpuSpec;
use super::display::Resolution;
use super::gpu::GpuSpec;
use super::memory::{DiskSpace, RamSpec};

/// Sentinel for an OS that did not identify itself
pub const UNKNOWN_OS: &str = "Unknown";

/// Complete system information; every field always holds a value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSpecs {
    /// Operating system and version
    pub os: String,
    /// Primary display resolution (fallback 1920x1080)
    pub resolution: Resolution,
    pub cpu: CpuSpec,
    pub gpu: GpuSpec,
    pub ram: RamSpec,
    /// Free space on the system volume
    pub storage_free: DiskSpace,
}

/// "Windows 11 (26100)", "Ubuntu 24.04" etc.
pub fn os_description() -> String {
    describe_os(System::name(), System::os_version())
}

fn describe_os(name: Option<String>, version: Option<String>) -> String {
    let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let version = version.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    match (name, version) {
        (Some(name), Some(version)) => format!("{} {}", name, version),
        (Some(name), None) => name,
        (None, _) => UNKNOWN_OS.to_string(),
    }
}
