//! macOS: sysctl and system_profiler

use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::hardware::command::CommandRunner;
use crate::hardware::display::Resolution;
use crate::hardware::gpu::GpuSpec;

use super::PlatformProbe;

pub struct MacProbe {
    runner: Arc<dyn CommandRunner>,
    /// `system_profiler` output for the current pass; `Some(None)` when it failed.
    displays: Mutex<Option<Option<String>>>,
}

impl MacProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            displays: Mutex::new(None),
        }
    }

    /// GPU and resolution both come from this report; it is slow, so run it once per pass.
    fn displays_report(&self) -> Option<String> {
        let mut cached = self.displays.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .get_or_insert_with(|| {
                self.runner
                    .run("system_profiler", &["SPDisplaysDataType"])
                    .map_err(|err| debug!(%err, "system_profiler unavailable"))
                    .ok()
            })
            .clone()
    }
}

impl PlatformProbe for MacProbe {
    fn os_family(&self) -> &'static str {
        "macos"
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn start_pass(&self) {
        *self.displays.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cpu_model(&self) -> Option<String> {
        self.runner()
            .run("sysctl", &["-n", "machdep.cpu.brand_string"])
            .map_err(|err| debug!(%err, "sysctl brand string unavailable"))
            .ok()
            .map(|brand| brand.trim().to_string())
            .filter(|brand| !brand.is_empty())
    }

    fn native_gpu(&self) -> Option<GpuSpec> {
        parse_displays_gpu(&self.displays_report()?)
    }

    fn resolution(&self) -> Option<Resolution> {
        parse_displays_resolution(&self.displays_report()?)
    }
}

/// First "Chipset Model:" and the "VRAM (...)" line that goes with it.
fn parse_displays_gpu(report: &str) -> Option<GpuSpec> {
    let mut name: Option<String> = None;
    let mut vram_mb: Option<u64> = None;

    for line in report.lines().map(str::trim) {
        if let Some(model) = line.strip_prefix("Chipset Model:") {
            if name.is_some() {
                break;
            }
            let model = model.trim();
            if !model.is_empty() {
                name = Some(model.to_string());
            }
        } else if line.starts_with("VRAM") && name.is_some() && vram_mb.is_none() {
            // "VRAM (Total): 8 GB" or "VRAM (Dynamic, Max): 1536 MB"
            vram_mb = line
                .split_once(':')
                .and_then(|(_, value)| parse_vram(value));
        }
    }

    name.map(|name| GpuSpec { name, vram_mb })
}

fn parse_vram(value: &str) -> Option<u64> {
    let mut parts = value.split_whitespace();
    let amount = parts.next()?.parse::<u64>().ok()?;
    match parts.next().map(str::to_ascii_uppercase).as_deref() {
        Some("GB") => amount.checked_mul(1024),
        _ => Some(amount),
    }
}

fn parse_displays_resolution(report: &str) -> Option<Resolution> {
    report
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Resolution:"))
        .find_map(Resolution::find_in)
}
