//! In-process backend: a GGUF model run through llama.cpp.
//!
//! The model is loaded once when the backend is built. Generation runs on a
//! blocking worker with a fixed token budget and stop markers. Builds without
//! the `llama` feature keep the backend selectable but never ready.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{non_empty_answer, InferenceError, TextInference};
use crate::config::InProcessConfig;
use crate::report::AnalysisRequest;

pub struct InProcessBackend {
    settings: InProcessConfig,
    timeout: Duration,
    engine: Result<Arc<engine::Engine>, InferenceError>,
}

impl InProcessBackend {
    pub fn load(config: &InProcessConfig, timeout: Duration) -> Self {
        let engine = engine::Engine::load(config).map(Arc::new);
        if let Err(err) = &engine {
            warn!(path = %config.model_path.display(), %err, "in-process model unavailable");
        }

        InProcessBackend {
            settings: config.clone(),
            timeout,
            engine,
        }
    }
}

#[async_trait]
impl TextInference for InProcessBackend {
    fn name(&self) -> &str {
        "in_process"
    }

    fn readiness(&self) -> Result<(), InferenceError> {
        self.engine.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, InferenceError> {
        let engine = self.engine.clone()?;
        let prompt = render_chat_prompt(request.system_instruction(), request.prompt());
        let settings = self.settings.clone();

        debug!(max_tokens = settings.max_tokens, "running in-process generation");
        let generated = run_blocking_with_deadline(self.timeout, move |stop| {
            engine.generate(&prompt, &settings, stop)
        })
        .await?;

        let answer = truncate_at_stop(&generated, &self.settings.stop).to_string();
        non_empty_answer("local model", answer)
    }
}

/// Run `work` on a blocking worker, bounded by `deadline`.
///
/// When the caller stops waiting (deadline hit, or the future dropped by a
/// cancelled run) the worker's stop flag is raised so it can give up the model.
async fn run_blocking_with_deadline<F>(
    deadline: Duration,
    work: F,
) -> Result<String, InferenceError>
where
    F: FnOnce(&AtomicBool) -> Result<String, InferenceError> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let _abandon = RaiseOnDrop(Arc::clone(&stop));
    let worker = tokio::task::spawn_blocking(move || work(&stop));

    match tokio::time::timeout(deadline, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(InferenceError::BackendError(format!(
            "Model worker crashed: {}",
            join_err
        ))),
        Err(_) => Err(InferenceError::BackendError(format!(
            "Model did not finish within {}s",
            deadline.as_secs()
        ))),
    }
}

struct RaiseOnDrop(Arc<AtomicBool>);

impl Drop for RaiseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Chat template the bundled instruct models expect.
fn render_chat_prompt(system: &str, user: &str) -> String {
    format!(
        "<|system|>\n{}<|end|>\n<|user|>\n{}<|end|>\n<|assistant|>",
        system.trim(),
        user.trim()
    )
}

/// Cut generated text at the earliest stop marker.
fn truncate_at_stop<'a>(text: &'a str, stop: &[String]) -> &'a str {
    stop.iter()
        .filter(|marker| !marker.is_empty())
        .filter_map(|marker| text.find(marker.as_str()))
        .min()
        .map_or(text, |idx| &text[..idx])
}

fn missing_model_message(path: &Path) -> String {
    format!(
        "Model file not found at {}.\n\
         Create a 'models' folder next to canirun, download a GGUF model into it \
         (for example Llama-3.2-3B-Instruct-Q4_K_M.gguf), and point \
         inference.in_process.model_path or CANIRUN_MODEL_PATH at the file.",
        path.display()
    )
}

#[cfg(feature = "llama")]
mod engine {
    use std::fmt::Display;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaModel, Special};
    use llama_cpp_2::sampling::LlamaSampler;
    use tracing::info;

    use super::{missing_model_message, truncate_at_stop};
    use crate::config::InProcessConfig;
    use crate::inference::InferenceError;

    const SAMPLER_SEED: u32 = 1234;

    pub struct Engine {
        backend: LlamaBackend,
        model: LlamaModel,
        // One generation at a time per loaded model
        gate: Mutex<()>,
    }

    fn backend_error(context: &str, err: impl Display) -> InferenceError {
        InferenceError::BackendError(format!("{}: {}", context, err))
    }

    impl Engine {
        pub fn load(config: &InProcessConfig) -> Result<Self, InferenceError> {
            if !config.model_path.is_file() {
                return Err(InferenceError::NoCredential(missing_model_message(
                    &config.model_path,
                )));
            }

            let backend = LlamaBackend::init()
                .map_err(|err| backend_error("llama.cpp init failed", err))?;
            let model = LlamaModel::load_from_file(
                &backend,
                &config.model_path,
                &LlamaModelParams::default(),
            )
            .map_err(|err| {
                InferenceError::NoCredential(format!(
                    "Could not load model {}: {}",
                    config.model_path.display(),
                    err
                ))
            })?;

            info!(path = %config.model_path.display(), "model loaded");
            Ok(Engine {
                backend,
                model,
                gate: Mutex::new(()),
            })
        }

        /// Generate until a stop marker, the token budget, or `stop` is raised.
        pub fn generate(
            &self,
            prompt: &str,
            settings: &InProcessConfig,
            stop: &AtomicBool,
        ) -> Result<String, InferenceError> {
            let _guard = self
                .gate
                .lock()
                .map_err(|_| InferenceError::BackendError("model lock poisoned".to_string()))?;
            let abandoned = || {
                if stop.load(Ordering::Relaxed) {
                    Err(InferenceError::BackendError("generation abandoned".to_string()))
                } else {
                    Ok(())
                }
            };
            // A previous request may have held the gate past our deadline.
            abandoned()?;

            let threads = settings.threads.max(1) as i32;
            let batch_size = settings.batch_size.max(1);
            let ctx_params = LlamaContextParams::default()
                .with_n_ctx(NonZeroU32::new(settings.context_size))
                .with_n_batch(batch_size)
                .with_n_threads(threads)
                .with_n_threads_batch(threads);
            let mut ctx = self
                .model
                .new_context(&self.backend, ctx_params)
                .map_err(|err| backend_error("context creation failed", err))?;

            let tokens = self
                .model
                .str_to_token(prompt, AddBos::Always)
                .map_err(|err| backend_error("tokenization failed", err))?;
            if tokens.is_empty() {
                return Err(InferenceError::BackendError("empty prompt".to_string()));
            }
            let budget = settings.context_size as usize;
            if tokens.len() + settings.max_tokens as usize > budget {
                return Err(InferenceError::BackendError(format!(
                    "prompt is {} tokens, too long for a {}-token context",
                    tokens.len(),
                    budget
                )));
            }

            // Feed the prompt in batch-sized chunks; only the last token needs logits.
            let mut batch = LlamaBatch::new(batch_size as usize, 1);
            let last = tokens.len() - 1;
            for (chunk_index, chunk) in tokens.chunks(batch_size as usize).enumerate() {
                abandoned()?;
                batch.clear();
                for (offset, token) in chunk.iter().enumerate() {
                    let pos = chunk_index * batch_size as usize + offset;
                    batch
                        .add(*token, pos as i32, &[0], pos == last)
                        .map_err(|err| backend_error("batch error", err))?;
                }
                ctx.decode(&mut batch)
                    .map_err(|err| backend_error("prompt decode failed", err))?;
            }

            let mut sampler = LlamaSampler::chain_simple([
                LlamaSampler::temp(settings.temperature),
                LlamaSampler::dist(SAMPLER_SEED),
            ]);

            let mut n_cur = tokens.len() as i32;
            let mut bytes: Vec<u8> = Vec::new();
            for _ in 0..settings.max_tokens {
                abandoned()?;
                let token = sampler.sample(&ctx, batch.n_tokens() - 1);
                sampler.accept(token);
                if self.model.is_eog_token(token) {
                    break;
                }

                let piece = self
                    .model
                    .token_to_bytes(token, Special::Tokenize)
                    .map_err(|err| backend_error("detokenize failed", err))?;
                bytes.extend_from_slice(&piece);

                let text = String::from_utf8_lossy(&bytes);
                if truncate_at_stop(&text, &settings.stop).len() < text.len() {
                    break;
                }

                batch.clear();
                batch
                    .add(token, n_cur, &[0], true)
                    .map_err(|err| backend_error("batch error", err))?;
                n_cur += 1;
                ctx.decode(&mut batch)
                    .map_err(|err| backend_error("decode failed", err))?;
            }

            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

#[cfg(not(feature = "llama"))]
mod engine {
    use std::sync::atomic::AtomicBool;

    use super::missing_model_message;
    use crate::config::InProcessConfig;
    use crate::inference::InferenceError;

    /// Never constructed: this build has no llama.cpp.
    pub enum Engine {}

    impl Engine {
        pub fn load(config: &InProcessConfig) -> Result<Self, InferenceError> {
            let mut message = String::from(
                "This build of canirun has no in-process model support.\n\
                 Rebuild with `cargo build --release --features llama` \
                 (add cuda, vulkan or metal for GPU offload), or choose \
                 --backend hosted / --backend local.",
            );
            if !config.model_path.is_file() {
                message.push_str("\n\n");
                message.push_str(&missing_model_message(&config.model_path));
            }
            Err(InferenceError::NoCredential(message))
        }

        pub fn generate(
            &self,
            _prompt: &str,
            _settings: &InProcessConfig,
            _stop: &AtomicBool,
        ) -> Result<String, InferenceError> {
            match *self {}
        }
    }
}
