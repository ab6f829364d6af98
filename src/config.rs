//! Configuration management for canirun
//!
//! Config file location:
//! - Linux: ~/.config/canirun/config.toml
//! - macOS: ~/Library/Application Support/com.canirun.canirun/config.toml
//! - Windows: %APPDATA%/canirun/canirun/config/config.toml
//!
//! You can override the config location by setting `CANIRUN_CONFIG_PATH`.
//! Configuration is resolved once at startup and passed down explicitly.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Game catalog endpoints
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Hardware probing
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Inference backend selection and settings
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

            let config: Config = toml::from_str(&content).with_context(|| {
                format!("Failed to parse config from {}", config_path.display())
            })?;

            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file and apply `CANIRUN_*` environment overrides on top.
    pub fn resolve() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, toml)
            .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("CANIRUN_CONFIG_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        let proj_dirs = ProjectDirs::from("com", "canirun", "canirun")
            .context("Could not determine project directories")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Create default config file if it doesn't exist
    pub fn init() -> Result<Self> {
        let config = Self::load()?;

        let config_path = Self::config_path()?;
        if !config_path.exists() {
            config.save()?;
        }

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(backend) = env_value("CANIRUN_BACKEND").and_then(|v| v.parse().ok()) {
            self.inference.backend = backend;
        }
        if let Some(host) = env_value("CANIRUN_LOCAL_HOST") {
            self.inference.local.host = host;
        }
        if let Some(port) = env_value("CANIRUN_LOCAL_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.inference.local.port = port;
        }
        if let Some(path) = env_value("CANIRUN_MODEL_PATH") {
            self.inference.in_process.model_path = PathBuf::from(path);
        }
        if let Some(secs) = env_value("CANIRUN_CATALOG_TIMEOUT_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.catalog.timeout_seconds = secs;
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Catalog (Steam store) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Search endpoint; the game name is appended as a path segment
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// App details endpoint; queried with `?appids=<id>`
    #[serde(default = "default_details_url")]
    pub details_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_catalog_timeout")]
    pub timeout_seconds: u64,

    /// Number of retry attempts for transient network errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            details_url: default_details_url(),
            timeout_seconds: default_catalog_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

fn default_search_url() -> String {
    "https://steamcommunity.com/actions/SearchApps".to_string()
}

fn default_details_url() -> String {
    "https://store.steampowered.com/api/appdetails".to_string()
}

fn default_catalog_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

/// Hardware probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Deadline for every external command the probe spawns
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds.max(1))
    }
}

fn default_command_timeout() -> u64 {
    5
}

/// Which inference backend answers the compatibility question
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hosted generative-text API (Google AI Studio)
    #[default]
    Hosted,
    /// Local OpenAI-compatible server (LM Studio, llama-server, ...)
    Local,
    /// GGUF model loaded into this process
    InProcess,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Hosted => write!(f, "hosted"),
            BackendKind::Local => write!(f, "local"),
            BackendKind::InProcess => write!(f, "in_process"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hosted" | "gemini" | "cloud" => Ok(BackendKind::Hosted),
            "local" | "lmstudio" | "http" => Ok(BackendKind::Local),
            "in_process" | "inprocess" | "llama" => Ok(BackendKind::InProcess),
            other => Err(format!("unknown inference backend '{other}'")),
        }
    }
}

/// Inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Active backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Deadline for a single analysis call
    #[serde(default = "default_inference_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub hosted: HostedConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub in_process: InProcessConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            timeout_seconds: default_inference_timeout(),
            hosted: HostedConfig::default(),
            local: LocalConfig::default(),
            in_process: InProcessConfig::default(),
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

fn default_inference_timeout() -> u64 {
    120
}

/// Hosted API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConfig {
    /// API base URL
    #[serde(default = "default_hosted_endpoint")]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_hosted_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Explicit KEY=VALUE file to read the key from (defaults to `.env`
    /// beside the executable, then in the working directory)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_hosted_endpoint(),
            model: default_hosted_model(),
            api_key_env: default_api_key_env(),
            key_file: None,
        }
    }
}

fn default_hosted_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_hosted_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_AI_API_KEY".to_string()
}

/// Local OpenAI-compatible server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_host")]
    pub host: String,

    #[serde(default = "default_local_port")]
    pub port: u16,

    #[serde(default = "default_local_model")]
    pub model: String,

    #[serde(default = "default_local_temperature")]
    pub temperature: f32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            host: default_local_host(),
            port: default_local_port(),
            model: default_local_model(),
            temperature: default_local_temperature(),
        }
    }
}

fn default_local_host() -> String {
    "localhost".to_string()
}

fn default_local_port() -> u16 {
    1234
}

fn default_local_model() -> String {
    "openai/gpt-oss-20b".to_string()
}

fn default_local_temperature() -> f32 {
    0.7
}

/// In-process model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProcessConfig {
    /// Path to a GGUF model file
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Context window size in tokens
    #[serde(default = "default_context_size")]
    pub context_size: u32,

    /// CPU threads used for generation
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Prompt processing batch size
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Output token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_in_process_temperature")]
    pub temperature: f32,

    /// Generation stops at the first of these markers
    #[serde(default = "default_stop_markers")]
    pub stop: Vec<String>,
}

impl Default for InProcessConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            context_size: default_context_size(),
            threads: default_threads(),
            batch_size: default_batch_size(),
            max_tokens: default_max_tokens(),
            temperature: default_in_process_temperature(),
            stop: default_stop_markers(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./models/Llama-3.2-3B-Instruct-Q4_K_M.gguf")
}

fn default_context_size() -> u32 {
    2048
}

fn default_threads() -> u32 {
    6
}

fn default_batch_size() -> u32 {
    512
}

fn default_max_tokens() -> u32 {
    300
}

fn default_in_process_temperature() -> f32 {
    0.3
}

fn default_stop_markers() -> Vec<String> {
    vec!["<|end|>".to_string(), "<|user|>".to_string()]
}

/// Get configuration file path for display purposes
pub fn get_config_path() -> Result<String> {
    let path = Config::config_path()?;
    Ok(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.catalog.search_url,
            "https://steamcommunity.com/actions/SearchApps"
        );
        assert_eq!(config.catalog.timeout_seconds, 30);
        assert_eq!(config.probe.command_timeout_seconds, 5);
        assert_eq!(config.inference.backend, BackendKind::Hosted);
        assert_eq!(config.inference.hosted.model, "gemini-2.5-flash");
        assert_eq!(config.inference.hosted.api_key_env, "GOOGLE_AI_API_KEY");
        assert_eq!(config.inference.local.port, 1234);
        assert_eq!(config.inference.in_process.max_tokens, 300);
        assert_eq!(config.inference.in_process.stop, vec!["<|end|>", "<|user|>"]);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();

        assert!(toml.contains("[catalog]"));
        assert!(toml.contains("command_timeout_seconds"));
        assert!(toml.contains("backend = \"hosted\""));
        assert!(toml.contains("[inference.local]"));
        assert!(toml.contains("model_path"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [inference]
            backend = "in_process"

            [inference.local]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.inference.backend, BackendKind::InProcess);
        assert_eq!(config.inference.local.port, 8080);
        assert_eq!(config.inference.local.host, "localhost");
        assert_eq!(config.catalog.max_retries, 1);
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("hosted".parse::<BackendKind>(), Ok(BackendKind::Hosted));
        assert_eq!("LMStudio".parse::<BackendKind>(), Ok(BackendKind::Local));
        assert_eq!("in-process".parse::<BackendKind>(), Ok(BackendKind::InProcess));
        assert!("openai".parse::<BackendKind>().is_err());
    }
}
