//! Inference backends
//!
//! Every backend answers the same question through [`TextInference`] and
//! reports failures with the same [`InferenceError`] shape, so callers never
//! care which one is configured.

mod credential;
mod hosted;
mod in_process;
mod local;

pub use hosted::HostedBackend;
pub use in_process::InProcessBackend;
pub use local::LocalBackend;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{BackendKind, InferenceConfig};
use crate::report::AnalysisRequest;

/// Inference errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// No API key or model weights; the message says how to set one up.
    #[error("{0}")]
    NoCredential(String),

    #[error("{0}")]
    BackendUnreachable(String),

    #[error("{0}")]
    BackendError(String),
}

#[async_trait]
pub trait TextInference: Send + Sync {
    /// Short label for logs and progress output
    fn name(&self) -> &str;

    /// Whether the backend can take requests at all (credential present,
    /// weights loaded). Never touches the network.
    fn readiness(&self) -> Result<(), InferenceError>;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, InferenceError>;
}

/// Build the configured backend. Credentials and model weights are resolved
/// here, once, and shared read-only afterwards.
pub fn build_backend(config: &InferenceConfig) -> Arc<dyn TextInference> {
    let timeout = config.timeout();
    let backend: Arc<dyn TextInference> = match config.backend {
        BackendKind::Hosted => Arc::new(HostedBackend::from_config(&config.hosted, timeout)),
        BackendKind::Local => Arc::new(LocalBackend::from_config(&config.local, timeout)),
        BackendKind::InProcess => {
            Arc::new(InProcessBackend::load(&config.in_process, timeout))
        }
    };
    info!(backend = backend.name(), "inference backend ready");
    backend
}

/// Trimmed answer, or an error naming the backend when it said nothing.
fn non_empty_answer(backend: &str, text: String) -> Result<String, InferenceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InferenceError::BackendError(format!(
            "{} returned an empty answer",
            backend
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;

    #[test]
    fn factory_follows_configuration() {
        let mut config = InferenceConfig::default();

        config.backend = BackendKind::Local;
        let local = build_backend(&config);
        assert_eq!(local.name(), "local");
        assert!(local.readiness().is_ok());

        config.backend = BackendKind::InProcess;
        config.in_process.model_path = "/nonexistent/canirun/model.gguf".into();
        let in_process = build_backend(&config);
        assert_eq!(in_process.name(), "in_process");
        assert!(matches!(
            in_process.readiness(),
            Err(InferenceError::NoCredential(_))
        ));
    }

    #[test]
    fn blank_answers_are_errors() {
        assert_eq!(non_empty_answer("local", "  ok \n".into()).unwrap(), "ok");
        assert!(matches!(
            non_empty_answer("local", " \n".into()),
            Err(InferenceError::BackendError(msg)) if msg.contains("local")
        ));
    }
}
