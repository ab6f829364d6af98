//! Windows: CIM queries through PowerShell, display size from Win32

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::hardware::command::{run_powershell, CommandRunner};
use crate::hardware::display::{self, Resolution};
use crate::hardware::gpu::{self, GpuSpec};

use super::PlatformProbe;

const CPU_QUERY: &str = "Get-CimInstance Win32_Processor | Select-Object Name | ConvertTo-Json";
const GPU_QUERY: &str =
    "Get-CimInstance Win32_VideoController | Select-Object Name, AdapterRAM | ConvertTo-Json";

pub struct WindowsProbe {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl PlatformProbe for WindowsProbe {
    fn os_family(&self) -> &'static str {
        "windows"
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn cpu_model(&self) -> Option<String> {
        let json = run_powershell(self.runner(), CPU_QUERY)
            .map_err(|err| debug!(%err, "Win32_Processor query failed"))
            .ok()?;
        parse_processor_name(&json)
    }

    fn native_gpu(&self) -> Option<GpuSpec> {
        let json = run_powershell(self.runner(), GPU_QUERY)
            .map_err(|err| debug!(%err, "Win32_VideoController query failed"))
            .ok()?;
        gpu::select_adapter(parse_video_controllers(&json))
    }

    fn resolution(&self) -> Option<Resolution> {
        display::primary_monitor()
    }

    fn system_volume(&self) -> PathBuf {
        let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
        PathBuf::from(format!("{}\\", drive.trim_end_matches('\\')))
    }
}

/// ConvertTo-Json emits a bare object for one instance and an array for several.
fn cim_records(json: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(items)) => items,
        Ok(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    }
}

fn parse_processor_name(json: &str) -> Option<String> {
    cim_records(json)
        .first()
        .and_then(|record| record.get("Name"))
        .and_then(Value::as_str)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn parse_video_controllers(json: &str) -> Vec<GpuSpec> {
    cim_records(json)
        .iter()
        .filter_map(|record| {
            let name = record.get("Name")?.as_str()?.trim();
            // AdapterRAM is bytes, 0 when the driver does not say
            let vram_mb = record
                .get("AdapterRAM")
                .and_then(Value::as_u64)
                .filter(|&bytes| bytes > 0)
                .map(|bytes| bytes / 1024 / 1024);
            Some(GpuSpec {
                name: name.to_string(),
                vram_mb,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::command::testing::ScriptedRunner;

    const TWO_ADAPTERS: &str = r#"[
        { "Name": "Parsec Virtual Display Adapter", "AdapterRAM": null },
        { "Name": "NVIDIA GeForce RTX 3060", "AdapterRAM": 4293918720 }
    ]"#;

    fn probe(runner: ScriptedRunner) -> WindowsProbe {
        WindowsProbe::new(Arc::new(runner))
    }

    #[test]
    fn processor_name_from_single_object() {
        let runner = ScriptedRunner::new().with_args(
            "powershell",
            "Win32_Processor",
            r#"{ "Name": "AMD Ryzen 5 5600X 6-Core Processor          " }"#,
        );
        assert_eq!(
            probe(runner).cpu_model().as_deref(),
            Some("AMD Ryzen 5 5600X 6-Core Processor")
        );
    }

    #[test]
    fn processor_name_from_array_takes_first() {
        let json = r#"[{ "Name": "Intel(R) Xeon(R) Gold 6130" }, { "Name": "second socket" }]"#;
        assert_eq!(
            parse_processor_name(json).as_deref(),
            Some("Intel(R) Xeon(R) Gold 6130")
        );
    }

    #[test]
    fn malformed_json_is_none() {
        assert_eq!(parse_processor_name("Get-CimInstance : access denied"), None);
        assert!(parse_video_controllers("").is_empty());
    }

    #[test]
    fn video_controllers_skip_virtual_adapters() {
        let runner = ScriptedRunner::new().with_args("powershell", "Win32_VideoController", TWO_ADAPTERS);
        let gpu = probe(runner).native_gpu().unwrap();
        assert_eq!(gpu.name, "NVIDIA GeForce RTX 3060");
        assert_eq!(gpu.vram_mb, Some(4095));
    }

    #[test]
    fn cpu_and_gpu_queries_are_distinct() {
        let runner = ScriptedRunner::new()
            .with_args("powershell", "Win32_Processor", r#"{ "Name": "Some CPU" }"#)
            .with_args("powershell", "Win32_VideoController", TWO_ADAPTERS);
        let probe = probe(runner);
        assert_eq!(probe.cpu_model().as_deref(), Some("Some CPU"));
        assert_eq!(probe.native_gpu().unwrap().name, "NVIDIA GeForce RTX 3060");
    }
}
