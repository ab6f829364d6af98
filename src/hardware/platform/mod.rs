//! Per-OS detection strategies
//!
//! One [`PlatformProbe`] per operating system, chosen once from the running OS.
//! Every variant builds on every target and only talks to the machine through a
//! [`CommandRunner`] (plus a few files), so each branch can be exercised with
//! canned output on any host.

mod linux;
mod macos;
mod windows;

pub use linux::LinuxProbe;
pub use macos::MacProbe;
pub use windows::WindowsProbe;

use std::path::PathBuf;
use std::sync::Arc;

use super::command::CommandRunner;
use super::display::Resolution;
use super::gpu::{self, GpuSpec};

pub trait PlatformProbe: Send + Sync {
    /// "windows", "linux", "macos" or "generic"
    fn os_family(&self) -> &'static str;

    fn runner(&self) -> &dyn CommandRunner;

    /// Called at the start of every detection pass; drops per-pass caches.
    fn start_pass(&self) {}

    /// Model name from the platform's own processor query.
    fn cpu_model(&self) -> Option<String>;

    /// Vendor tool enumeration, tried before anything OS-specific.
    fn vendor_gpu(&self) -> Option<GpuSpec> {
        gpu::query_nvidia_smi(self.runner())
    }

    /// OS-native adapter enumeration.
    fn native_gpu(&self) -> Option<GpuSpec>;

    fn resolution(&self) -> Option<Resolution>;

    /// Volume whose free space is reported as storage.
    fn system_volume(&self) -> PathBuf {
        PathBuf::from("/")
    }
}

/// Probe for the OS named by `std::env::consts::OS`.
pub fn for_os(os: &str, runner: Arc<dyn CommandRunner>) -> Box<dyn PlatformProbe> {
    match os {
        "windows" => Box::new(WindowsProbe::new(runner)),
        "linux" => Box::new(LinuxProbe::new(runner)),
        "macos" => Box::new(MacProbe::new(runner)),
        _ => Box::new(GenericProbe::new(runner)),
    }
}

pub fn current(runner: Arc<dyn CommandRunner>) -> Box<dyn PlatformProbe> {
    for_os(std::env::consts::OS, runner)
}

/// Unsupported OS: vendor tool only, everything else falls back to sentinels.
pub struct GenericProbe {
    runner: Arc<dyn CommandRunner>,
}

impl GenericProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl PlatformProbe for GenericProbe {
    fn os_family(&self) -> &'static str {
        "generic"
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn cpu_model(&self) -> Option<String> {
        None
    }

    fn native_gpu(&self) -> Option<GpuSpec> {
        None
    }

    fn resolution(&self) -> Option<Resolution> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::command::testing::ScriptedRunner;

    #[test]
    fn selects_variant_by_os_name() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::new());
        assert_eq!(for_os("windows", runner.clone()).os_family(), "windows");
        assert_eq!(for_os("linux", runner.clone()).os_family(), "linux");
        assert_eq!(for_os("macos", runner.clone()).os_family(), "macos");
        assert_eq!(for_os("freebsd", runner).os_family(), "generic");
    }
}
