//! Local backend: an OpenAI-compatible chat server on this machine (LM Studio,
//! llama-server, ...).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{non_empty_answer, InferenceError, TextInference};
use crate::config::LocalConfig;
use crate::report::AnalysisRequest;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct LocalBackend {
    client: Client,
    host: String,
    port: u16,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl LocalBackend {
    pub fn from_config(config: &LocalConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        LocalBackend {
            client,
            host: config.host.trim().to_string(),
            port: config.port,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn not_running(&self) -> InferenceError {
        InferenceError::BackendUnreachable(format!(
            "Local AI server is not running at {}. Start LM Studio (or another \
             OpenAI-compatible server), load a model and enable the server on port {}.",
            self.address(),
            self.port
        ))
    }

    /// The server accepted the request but did not finish in time.
    fn timed_out(&self) -> InferenceError {
        InferenceError::BackendError(format!(
            "Local AI at {} did not answer within {}s. The model may still be loading \
             or is too slow for this machine; try a smaller model or raise \
             inference.timeout_seconds.",
            self.address(),
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl TextInference for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    /// The server is only discovered on first use.
    fn readiness(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, InferenceError> {
        let url = format!("http://{}/v1/chat/completions", self.address());
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_instruction(),
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt(),
                },
            ],
            temperature: self.temperature,
        };

        debug!(%url, model = %self.model, "sending local inference request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    debug!(%err, "local server unreachable");
                    self.not_running()
                } else if err.is_timeout() {
                    debug!(%err, "local server timed out");
                    self.timed_out()
                } else {
                    InferenceError::BackendError(format!("Local AI request failed: {}", err))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            if err.is_timeout() {
                self.timed_out()
            } else {
                InferenceError::BackendError(format!("Local AI response unreadable: {}", err))
            }
        })?;

        if !status.is_success() {
            return Err(InferenceError::BackendError(format!(
                "Error analyzing with local AI ({}): {}",
                status,
                error_message(&text)
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|err| {
            InferenceError::BackendError(format!("Local AI returned malformed JSON: {}", err))
        })?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        non_empty_answer("local AI", answer)
    }
}

/// `{"error": {"message": ..}}`, `{"error": ".."}` or the raw body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Resolution;
    use crate::report::fixtures::{sample_requirements, sample_specs};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, handle)
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::compose(
            &sample_specs(),
            &sample_requirements(),
            Resolution::new(1920, 1080),
        )
    }

    fn backend(port: u16) -> LocalBackend {
        let config = LocalConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..LocalConfig::default()
        };
        LocalBackend::from_config(&config, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn returns_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "openai/gpt-oss-20b");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["role"], "user");
                assert!(body["temperature"].is_number());
                Json(json!({
                    "choices": [{ "index": 0, "message": { "role": "assistant", "content": "  Yes, at high settings.  " } }]
                }))
            }),
        );
        let (addr, handle) = spawn_server(app).await;

        let answer = backend(addr.port()).analyze(&request()).await.unwrap();
        assert_eq!(answer, "Yes, at high settings.");
        handle.abort();
    }

    #[tokio::test]
    async fn unreachable_server_names_host_and_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = backend(port).analyze(&request()).await.unwrap_err();
        match err {
            InferenceError::BackendUnreachable(msg) => {
                assert!(msg.contains(&format!("127.0.0.1:{}", port)), "{msg}");
                assert!(msg.contains("not running"));
            }
            other => panic!("expected BackendUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_server_is_a_timeout_not_a_missing_server() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "choices": [] }))
            }),
        );
        let (addr, handle) = spawn_server(app).await;

        let config = LocalConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            ..LocalConfig::default()
        };
        let backend = LocalBackend::from_config(&config, Duration::from_secs(1));
        let err = backend.analyze(&request()).await.unwrap_err();
        match err {
            InferenceError::BackendError(msg) => {
                assert!(msg.contains("did not answer within 1s"), "{msg}");
                assert!(msg.contains(&addr.port().to_string()), "{msg}");
                assert!(!msg.contains("not running"), "{msg}");
            }
            other => panic!("expected BackendError, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn server_error_message_is_surfaced() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "No models loaded. Please load a model first." })),
                )
            }),
        );
        let (addr, handle) = spawn_server(app).await;

        let err = backend(addr.port()).analyze(&request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::BackendError(ref msg) if msg.contains("No models loaded")));
        handle.abort();
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(error_message(r#"{"error":{"message":"boom"}}"#), "boom");
        assert_eq!(error_message(r#"{"error":"flat"}"#), "flat");
        assert_eq!(error_message(" plain text "), "plain text");
    }
}
