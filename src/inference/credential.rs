//! API key resolution: environment first, then `KEY=value` files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An API key that never shows up in logs or debug output
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Where a key was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Environment(String),
    File(PathBuf),
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Environment(var) => write!(f, "${}", var),
            KeySource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Look up `var` in the environment, then in each file of `key_files` in order.
pub fn resolve_api_key(var: &str, key_files: &[PathBuf]) -> Option<(ApiKey, KeySource)> {
    if let Some(value) = std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Some((ApiKey::new(value), KeySource::Environment(var.to_string())));
    }

    key_files.iter().find_map(|path| {
        let content = fs::read_to_string(path).ok()?;
        let value = parse_key_file(&content, var)?;
        debug!(path = %path.display(), "API key read from file");
        Some((ApiKey::new(value), KeySource::File(path.clone())))
    })
}

/// Candidate key files: an explicit one, then `.env` beside the executable,
/// then `.env` in the working directory.
pub fn default_key_files(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(path) = explicit {
        files.push(path.to_path_buf());
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        files.push(dir.join(".env"));
    }
    files.push(PathBuf::from(".env"));
    files.dedup();
    files
}

/// dotenv-style: `KEY=value`, optional `export`, quotes and `#` comments.
fn parse_key_file(content: &str, var: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("export ").unwrap_or(line).split_once('='))
        .find(|(key, _)| key.trim() == var)
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
