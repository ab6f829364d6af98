//! Prompt text rendering
//!
//! Pure functions: identical input always renders byte-identical text, so the
//! prompts sent to a backend are reproducible.

use crate::catalog::RequirementSet;
use crate::hardware::{Resolution, SystemSpecs};

const RULE_WIDTH: usize = 50;

/// Persona sent as the system instruction with every analysis
pub const EXPERT_PERSONA: &str = "You are a helpful PC gaming expert who compares system \
specifications against game requirements. Be honest and specific about performance expectations.";

/// Render detected hardware as the "YOUR PC SPECS" block.
pub fn format_specs(specs: &SystemSpecs) -> String {
    let mut lines = vec![
        "YOUR PC SPECS:".to_string(),
        "=".repeat(RULE_WIDTH),
        format!("OS: {}", specs.os),
        format!("Monitor Resolution: {}", specs.resolution),
        format!("CPU: {}", specs.cpu.model),
        format!(
            "CPU Cores/Threads: {}/{}",
            specs.cpu.physical_cores, specs.cpu.logical_threads
        ),
        format!("GPU: {}", specs.gpu.name),
    ];
    if let Some(vram) = specs.gpu.vram_mb {
        lines.push(format!("GPU Memory: {} MB", vram));
    }
    lines.push(format!(
        "RAM: {} GB (Available: {} GB)",
        specs.ram.total_gb, specs.ram.available_gb
    ));
    lines.push(format!("Free Storage: {}", specs.storage_free));
    terminated(&lines)
}

/// Render fetched requirements as the "GAME REQUIREMENTS FOR" block.
pub fn format_requirements(requirements: &RequirementSet) -> String {
    terminated(&[
        format!("GAME REQUIREMENTS FOR: {}", requirements.game_name),
        "=".repeat(RULE_WIDTH),
        String::new(),
        "Minimum Requirements:".to_string(),
        requirements.minimum_text.clone(),
        String::new(),
        "Recommended Requirements:".to_string(),
        requirements.recommended_text.clone(),
    ])
}

/// Each line followed by a newline.
fn terminated(lines: &[String]) -> String {
    lines.iter().map(|line| format!("{}\n", line)).collect()
}

/// Everything a backend needs for one compatibility question. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    game_name: String,
    system_instruction: String,
    prompt: String,
}

impl AnalysisRequest {
    pub fn compose(
        specs: &SystemSpecs,
        requirements: &RequirementSet,
        target_resolution: Resolution,
    ) -> Self {
        let game = &requirements.game_name;
        let prompt = format!(
            "{specs}\n{requirements}\n\
Question: Can my PC run {game}? Please compare my system specs against the game's requirements and tell me:\n\
1. Whether I meet the minimum requirements\n\
2. Whether I meet the recommended requirements\n\
3. What performance I can expect at my monitor resolution ({target_resolution})\n\
4. What graphics settings I should use (low/medium/high/ultra)\n\
5. Estimated FPS range I can expect\n\
6. Any components I should upgrade if needed",
            specs = format_specs(specs),
            requirements = format_requirements(requirements),
        );

        AnalysisRequest {
            game_name: game.clone(),
            system_instruction: EXPERT_PERSONA.to_string(),
            prompt,
        }
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::catalog::RequirementSet;
    use crate::hardware::{CpuSpec, DiskSpace, GpuSpec, RamSpec, Resolution, SystemSpecs};

    pub fn sample_specs() -> SystemSpecs {
        SystemSpecs {
            os: "Windows 11".to_string(),
            resolution: Resolution::new(2560, 1440),
            cpu: CpuSpec {
                model: "AMD Ryzen 7 7800X3D 8-Core Processor".to_string(),
                physical_cores: 8,
                logical_threads: 16,
            },
            gpu: GpuSpec {
                name: "NVIDIA GeForce RTX 4070 SUPER".to_string(),
                vram_mb: Some(12_282),
            },
            ram: RamSpec {
                total_gb: 31.15,
                available_gb: 18.4,
            },
            storage_free: DiskSpace::Free(412.07),
        }
    }

    pub fn sample_requirements() -> RequirementSet {
        RequirementSet {
            game_name: "Cyberpunk 2077".to_string(),
            minimum_text: "OS: 64-bit Windows 10\nMemory: 12 GB RAM".to_string(),
            recommended_text: "Memory: 16 GB RAM\nGraphics: GeForce RTX 2060 SUPER".to_string(),
        }
    }
}
