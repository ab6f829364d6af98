//! Hosted backend: Google Generative Language API (`generateContent`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::credential::{default_key_files, resolve_api_key, ApiKey};
use super::{non_empty_answer, InferenceError, TextInference};
use crate::config::HostedConfig;
use crate::report::AnalysisRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct HostedBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    key: Option<ApiKey>,
    timeout: Duration,
}

impl HostedBackend {
    /// Resolve the API key once and build the client.
    pub fn from_config(config: &HostedConfig, timeout: Duration) -> Self {
        let files = default_key_files(config.key_file.as_deref());
        let key = match resolve_api_key(&config.api_key_env, &files) {
            Some((key, source)) => {
                debug!(%source, "hosted API key resolved");
                Some(key)
            }
            None => {
                warn!(var = %config.api_key_env, "no hosted API key found");
                None
            }
        };
        Self::with_key(config, timeout, key)
    }

    pub fn with_key(config: &HostedConfig, timeout: Duration, key: Option<ApiKey>) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        HostedBackend {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_string(),
            model: config.model.trim().to_string(),
            api_key_env: config.api_key_env.clone(),
            key,
            timeout,
        }
    }

    fn setup_instructions(&self) -> String {
        format!(
            "No API key for the hosted AI backend.\n\
             Get a free key at https://aistudio.google.com/app/apikey, then either:\n  \
             - set the {var} environment variable, or\n  \
             - create a .env file next to canirun containing: {var}=your_api_key_here\n\
             Or choose another backend with --backend local / --backend in-process.",
            var = self.api_key_env
        )
    }

    fn timed_out(&self) -> InferenceError {
        InferenceError::BackendError(format!(
            "Hosted AI ({}) did not answer within {}s. Try again, or raise \
             inference.timeout_seconds.",
            self.model,
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl TextInference for HostedBackend {
    fn name(&self) -> &str {
        "hosted"
    }

    fn readiness(&self) -> Result<(), InferenceError> {
        match self.key {
            Some(_) => Ok(()),
            None => Err(InferenceError::NoCredential(self.setup_instructions())),
        }
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, InferenceError> {
        let Some(key) = &self.key else {
            return Err(InferenceError::NoCredential(self.setup_instructions()));
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system_instruction(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: request.prompt(),
                }],
            }],
        };

        debug!(model = %self.model, "sending hosted inference request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    InferenceError::BackendUnreachable(format!(
                        "Could not reach the hosted AI service at {}: {}",
                        self.endpoint, err
                    ))
                } else if err.is_timeout() {
                    self.timed_out()
                } else {
                    InferenceError::BackendError(format!("Hosted AI request failed: {}", err))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            if err.is_timeout() {
                self.timed_out()
            } else {
                InferenceError::BackendError(format!("Hosted AI response unreadable: {}", err))
            }
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(InferenceError::BackendError(format!(
                "Error querying hosted AI ({}): {}",
                status, message
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|err| {
            InferenceError::BackendError(format!("Hosted AI returned malformed JSON: {}", err))
        })?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(InferenceError::BackendError(format!(
                "Hosted AI blocked the prompt: {}",
                reason
            )));
        }

        let answer: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        non_empty_answer("hosted AI", answer)
    }
}
