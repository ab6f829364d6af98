//! Hardware detection module
//!
//! Detects OS, CPU, GPU, RAM, storage and display resolution using sysinfo
//! and per-OS command cascades. Detection never fails: anything that cannot
//! be identified is reported as a sentinel.

pub mod command;
pub mod cpu;
pub mod display;
pub mod gpu;
pub mod memory;
pub mod platform;
mod system;

pub use cpu::CpuSpec;
pub use display::{Resolution, FALLBACK_RESOLUTION};
pub use gpu::GpuSpec;
pub use memory::{DiskSpace, RamSpec};
pub use system::SystemSpecs;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use command::{CommandRunner, SystemCommandRunner};
use platform::PlatformProbe;

/// Probes the local machine through one platform variant chosen at construction.
pub struct HardwareProbe {
    platform: Box<dyn PlatformProbe>,
}

impl HardwareProbe {
    /// Probe for the running OS, bounding every spawned command by `command_timeout`.
    pub fn for_current_os(command_timeout: Duration) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(command_timeout));
        Self::with_platform(platform::current(runner))
    }

    pub fn with_platform(platform: Box<dyn PlatformProbe>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &dyn PlatformProbe {
        self.platform.as_ref()
    }

    /// Detect everything. Blocking: spawns processes and reads OS counters.
    pub fn probe(&self) -> SystemSpecs {
        let platform = self.platform.as_ref();
        debug!(os = platform.os_family(), "probing hardware");
        platform.start_pass();

        let resolution = platform.resolution().unwrap_or_else(|| {
            warn!("display resolution unavailable, using {}", FALLBACK_RESOLUTION);
            FALLBACK_RESOLUTION
        });

        let gpu = gpu::detect(platform);
        if gpu.is_unknown() {
            warn!("no GPU identified");
        }

        SystemSpecs {
            os: system::os_description(),
            resolution,
            cpu: CpuSpec::detect(platform),
            gpu,
            ram: RamSpec::detect(),
            storage_free: DiskSpace::detect(&platform.system_volume()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::command::testing::ScriptedRunner;

    fn probe_with(os: &str, runner: ScriptedRunner) -> SystemSpecs {
        HardwareProbe::with_platform(platform::for_os(os, Arc::new(runner))).probe()
    }

    fn assert_populated(specs: &SystemSpecs) {
        assert!(!specs.os.is_empty());
        assert!(specs.resolution.width > 0 && specs.resolution.height > 0);
        assert!(!specs.cpu.model.is_empty());
        assert!(specs.cpu.physical_cores >= 1);
        assert!(specs.cpu.logical_threads >= 1);
        assert!(!specs.gpu.name.is_empty());
        assert!(specs.ram.total_gb >= 0.0);
    }

    #[test]
    fn every_branch_survives_missing_tools() {
        for os in ["windows", "linux", "macos", "freebsd"] {
            let specs = probe_with(os, ScriptedRunner::new());
            assert_populated(&specs);
            assert_eq!(specs.gpu.name, gpu::UNKNOWN_GPU, "{os}");
            if os != "windows" {
                // the Windows variant asks Win32 directly, not a command
                assert_eq!(specs.resolution, FALLBACK_RESOLUTION, "{os}");
            }
        }
    }

    #[test]
    fn every_branch_survives_garbage_output() {
        for os in ["windows", "linux", "macos"] {
            let runner = ScriptedRunner::new()
                .with("powershell", "not json {")
                .with("nvidia-smi", ",,,")
                .with("lspci", "garbage")
                .with("xrandr", "Can't open display")
                .with("system_profiler", "???")
                .with("sysctl", "   ");
            let specs = probe_with(os, runner);
            assert_populated(&specs);
        }
    }

    #[test]
    fn vendor_tool_wins_over_os_enumeration() {
        let runner = ScriptedRunner::new()
            .with("nvidia-smi", "NVIDIA GeForce RTX 4090, 24564")
            .with("lspci", "01:00.0 VGA compatible controller: Something Else");
        let specs = probe_with("linux", runner);
        assert_eq!(specs.gpu.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(specs.gpu.vram_mb, Some(24564));
    }

    #[test]
    fn windows_skips_parsec_adapter() {
        let runner = ScriptedRunner::new().with_args(
            "powershell",
            "Win32_VideoController",
            r#"[{"Name":"Parsec Virtual Display Adapter"},{"Name":"NVIDIA GeForce RTX 3060"}]"#,
        );
        let specs = probe_with("windows", runner);
        assert_eq!(specs.gpu.name, "NVIDIA GeForce RTX 3060");
    }

    #[test]
    fn probes_this_machine() {
        let specs = HardwareProbe::for_current_os(Duration::from_secs(5)).probe();
        assert_populated(&specs);
    }
}
