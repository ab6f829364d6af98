//! CPU detection module
//!
//! The model name comes from the platform's own query (CIM, /proc/cpuinfo,
//! sysctl), falling back to the brand sysinfo reports, then to "Unknown CPU".
//! Core and thread counts always come from sysinfo.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use super::platform::PlatformProbe;

/// Sentinel model name when nothing identified the processor
pub const UNKNOWN_CPU: &str = "Unknown CPU";

/// CPU information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSpec {
    /// CPU name (e.g., "AMD Ryzen 7 5800X")
    pub model: String,
    /// Number of physical cores
    pub physical_cores: usize,
    /// Number of logical threads
    pub logical_threads: usize,
}

impl CpuSpec {
    pub fn detect(platform: &dyn PlatformProbe) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();

        let os_brand = sys.cpus().first().map(|cpu| cpu.brand().to_string());
        let model = resolve_model(platform.cpu_model(), os_brand);

        let logical_threads = if sys.cpus().is_empty() {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            sys.cpus().len()
        };
        let physical_cores = physical_or_half(sys.physical_core_count(), logical_threads);

        debug!(%model, physical_cores, logical_threads, "CPU detected");

        CpuSpec {
            model,
            physical_cores,
            logical_threads,
        }
    }
}

/// Platform query first, then the OS-reported brand, then the sentinel.
fn resolve_model(platform_model: Option<String>, os_brand: Option<String>) -> String {
    platform_model
        .into_iter()
        .chain(os_brand)
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_CPU.to_string())
}

fn physical_or_half(reported: Option<usize>, logical_threads: usize) -> usize {
    reported
        .filter(|&cores| cores > 0)
        .unwrap_or_else(|| (logical_threads / 2).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_model_wins() {
        let model = resolve_model(
            Some("AMD Ryzen 7 7800X3D 8-Core Processor".to_string()),
            Some("ignored".to_string()),
        );
        assert_eq!(model, "AMD Ryzen 7 7800X3D 8-Core Processor");
    }

    #[test]
    fn blank_platform_model_falls_through_to_brand() {
        let model = resolve_model(
            Some("   ".to_string()),
            Some("Intel(R) Core(TM)   i5-12400F".to_string()),
        );
        assert_eq!(model, "Intel(R) Core(TM) i5-12400F");
    }

    #[test]
    fn nothing_known_is_sentinel() {
        assert_eq!(resolve_model(None, Some(String::new())), UNKNOWN_CPU);
        assert_eq!(resolve_model(None, None), UNKNOWN_CPU);
    }

    #[test]
    fn missing_core_count_is_half_the_threads() {
        assert_eq!(physical_or_half(Some(8), 16), 8);
        assert_eq!(physical_or_half(None, 16), 8);
        assert_eq!(physical_or_half(Some(0), 12), 6);
        assert_eq!(physical_or_half(None, 1), 1);
    }
}
