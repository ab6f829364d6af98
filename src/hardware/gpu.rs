//! GPU detection module
//!
//! Detects the primary GPU with an ordered cascade, first success wins:
//! 1. Vendor tool: `nvidia-smi` (cross-platform, also reports VRAM)
//! 2. OS-native enumeration (CIM on Windows, lspci on Linux, system_profiler on macOS)
//! 3. The "Unable to detect GPU" sentinel
//!
//! Enumerations that can list several adapters go through [`select_adapter`],
//! which drops virtual/remote-desktop adapters and prefers dedicated GPUs over
//! integrated ones.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::command::CommandRunner;
use super::platform::PlatformProbe;

/// Sentinel name when no strategy identified a GPU
pub const UNKNOWN_GPU: &str = "Unable to detect GPU";

/// Adapters whose name contains one of these (lowercase) are never reported.
pub const VIRTUAL_ADAPTER_KEYWORDS: &[&str] = &[
    "parsec",
    "virtual",
    "remote",
    "microsoft basic",
    "vnc",
    "teamviewer",
    "rdp",
    "standard vga",
    "generic pnp",
    "hyper-v",
    "citrix",
    "vmware",
    "splashtop",
];

/// Lowercase name fragments that mark an integrated GPU.
pub const INTEGRATED_KEYWORDS: &[&str] = &[
    "intel(r) uhd",
    "intel(r) hd",
    "intel hd",
    "intel uhd",
    "intel iris xe",
    "amd radeon(tm) graphics",
    "radeon graphics",
    "vega graphics",
    "radeon vega",
];

/// GPU information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    /// GPU name (e.g., "NVIDIA GeForce RTX 3060")
    pub name: String,
    /// VRAM in MB (if detectable)
    pub vram_mb: Option<u64>,
}

impl GpuSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vram_mb: None,
        }
    }

    pub fn unknown() -> Self {
        Self::named(UNKNOWN_GPU)
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_GPU
    }
}

/// Run the detection cascade for this platform.
pub fn detect(platform: &dyn PlatformProbe) -> GpuSpec {
    if let Some(gpu) = platform.vendor_gpu() {
        debug!(name = %gpu.name, "GPU detected by vendor tool");
        return gpu;
    }

    if let Some(gpu) = platform.native_gpu() {
        debug!(name = %gpu.name, os = platform.os_family(), "GPU detected by OS enumeration");
        return gpu;
    }

    debug!("no GPU detection strategy succeeded");
    GpuSpec::unknown()
}

/// Lowercase, drop vendor boilerplate ("Corporation") and collapse whitespace so
/// lspci-style and marketing-style names match the same keywords.
fn normalize_adapter_name(name: &str) -> String {
    name.to_lowercase()
        .replace("corporation", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_virtual_adapter(name: &str) -> bool {
    let normalized = normalize_adapter_name(name);
    VIRTUAL_ADAPTER_KEYWORDS
        .iter()
        .any(|keyword| normalized.contains(keyword))
}

pub fn is_integrated(name: &str) -> bool {
    let normalized = normalize_adapter_name(name);
    let mut forms = vec![normalized.clone()];

    // lspci puts the marketing name in the last brackets:
    // "Intel Corporation Alder Lake-S GT1 [UHD Graphics 770]" -> "intel uhd graphics 770"
    if let (Some(open), Some(close)) = (normalized.rfind('['), normalized.rfind(']')) {
        if open < close {
            let vendor = normalized.split_whitespace().next().unwrap_or_default();
            forms.push(format!("{} {}", vendor, &normalized[open + 1..close]));
        }
    }

    forms.iter().any(|form| {
        INTEGRATED_KEYWORDS
            .iter()
            .any(|keyword| form.contains(keyword))
    })
}

/// Pick the adapter to report: virtual adapters are dropped, then the first
/// dedicated adapter wins, else the first integrated one.
pub fn select_adapter(adapters: Vec<GpuSpec>) -> Option<GpuSpec> {
    let (integrated, dedicated): (Vec<_>, Vec<_>) = adapters
        .into_iter()
        .filter(|gpu| !gpu.name.trim().is_empty() && !is_virtual_adapter(&gpu.name))
        .partition(|gpu| is_integrated(&gpu.name));

    dedicated.into_iter().next().or_else(|| integrated.into_iter().next())
}

/// Query NVIDIA GPUs with nvidia-smi.
pub fn query_nvidia_smi(runner: &dyn CommandRunner) -> Option<GpuSpec> {
    let output = runner
        .run(
            "nvidia-smi",
            &[
                "--query-gpu=name,memory.total",
                "--format=csv,noheader,nounits",
            ],
        )
        .map_err(|err| debug!(%err, "nvidia-smi unavailable"))
        .ok()?;

    select_adapter(parse_nvidia_smi(&output))
}

/// Parse `name, memory.total` CSV rows (one per GPU).
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuSpec> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let raw_name = parts.next().filter(|name| !name.is_empty())?;
            let name = if raw_name.starts_with("NVIDIA") {
                raw_name.to_string()
            } else {
                format!("NVIDIA {}", raw_name)
            };
            let vram_mb = parts.next().and_then(|mem| mem.parse::<u64>().ok());
            Some(GpuSpec { name, vram_mb })
        })
        .collect()
}
