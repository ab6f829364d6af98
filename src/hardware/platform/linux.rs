//! Linux: /proc/cpuinfo, lspci and xrandr

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::hardware::command::CommandRunner;
use crate::hardware::display::Resolution;
use crate::hardware::gpu::{self, GpuSpec};

use super::PlatformProbe;

const CPUINFO_PATH: &str = "/proc/cpuinfo";

pub struct LinuxProbe {
    runner: Arc<dyn CommandRunner>,
    cpuinfo_path: PathBuf,
}

impl LinuxProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cpuinfo_path: PathBuf::from(CPUINFO_PATH),
        }
    }

    pub fn with_cpuinfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cpuinfo_path = path.into();
        self
    }
}

impl PlatformProbe for LinuxProbe {
    fn os_family(&self) -> &'static str {
        "linux"
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn cpu_model(&self) -> Option<String> {
        let content = fs::read_to_string(&self.cpuinfo_path)
            .map_err(|err| debug!(%err, path = %self.cpuinfo_path.display(), "cpuinfo unreadable"))
            .ok()?;
        parse_cpuinfo_model(&content)
    }

    fn native_gpu(&self) -> Option<GpuSpec> {
        let output = self
            .runner()
            .run("lspci", &[])
            .map_err(|err| debug!(%err, "lspci unavailable"))
            .ok()?;
        gpu::select_adapter(parse_lspci(&output))
    }

    fn resolution(&self) -> Option<Resolution> {
        let output = self
            .runner()
            .run("xrandr", &["--current"])
            .map_err(|err| debug!(%err, "xrandr unavailable"))
            .ok()?;
        parse_xrandr_current(&output)
    }
}

fn parse_cpuinfo_model(content: &str) -> Option<String> {
    content
        .lines()
        .filter(|line| line.starts_with("model name"))
        .find_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|model| !model.is_empty())
}

/// Display controllers from lspci, e.g.
/// "01:00.0 VGA compatible controller: NVIDIA Corporation GA104 [GeForce RTX 3070] (rev a1)"
fn parse_lspci(output: &str) -> Vec<GpuSpec> {
    output
        .lines()
        .filter(|line| {
            line.contains("VGA") || line.contains("3D controller") || line.contains("Display controller")
        })
        .filter_map(parse_lspci_line)
        .map(GpuSpec::named)
        .collect()
}

fn parse_lspci_line(line: &str) -> Option<String> {
    let (_, after_class) = line.split_once(": ")?;
    let name = after_class
        .rfind(" (rev")
        .map_or(after_class, |idx| &after_class[..idx])
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn parse_xrandr_current(output: &str) -> Option<Resolution> {
    output
        .lines()
        .filter_map(|line| line.split_once("current"))
        .find_map(|(_, rest)| Resolution::find_in(rest))
}
