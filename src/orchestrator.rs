//! Compatibility check orchestration
//!
//! One check runs as a linear pipeline on its own tokio task:
//!
//! ```text
//! Idle ─► Probing ─► Searching ─► Fetching ─► Formatting ─► Inferring ─► Done
//!   │        │           │            │            │             │
//!   └────────┴───────────┴────────────┴────────────┴─────────────┴──► Failed(reason)
//! ```
//!
//! Stage changes and the final outcome are sent on a channel owned by that run,
//! so concurrent checks never share a sink. A [`RunHandle`] carries the
//! receiver and a [`CancellationToken`] checked at every stage.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogClient, CatalogError, GameRecord, RequirementSet};
use crate::config::Config;
use crate::hardware::{HardwareProbe, Resolution, SystemSpecs};
use crate::inference::{build_backend, InferenceError, TextInference};
use crate::report::AnalysisRequest;

// A run emits at most eight messages, so sends never wait on a slow reader.
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Probing,
    Searching,
    Fetching,
    Formatting,
    Inferring,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "Starting",
            Stage::Probing => "Detecting hardware",
            Stage::Searching => "Searching the catalog",
            Stage::Fetching => "Fetching requirements",
            Stage::Formatting => "Preparing analysis",
            Stage::Inferring => "Asking the AI",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Why a check ended without an analysis
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("{0}")]
    NoCredential(String),

    #[error("{0}")]
    GameNotFound(String),

    #[error("{0}")]
    RequirementsUnavailable(String),

    #[error("{0}")]
    BackendUnreachable(String),

    #[error("{0}")]
    BackendError(String),

    #[error("check cancelled")]
    Cancelled,
}

impl From<InferenceError> for FailureReason {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::NoCredential(msg) => FailureReason::NoCredential(msg),
            InferenceError::BackendUnreachable(msg) => FailureReason::BackendUnreachable(msg),
            InferenceError::BackendError(msg) => FailureReason::BackendError(msg),
        }
    }
}

/// Terminal failure, tagged with the stage that was running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct RunFailure {
    pub stage: Stage,
    pub reason: FailureReason,
}

impl RunFailure {
    fn new(stage: Stage, reason: FailureReason) -> Self {
        Self { stage, reason }
    }
}

/// Everything a successful check produced
#[derive(Debug, Clone)]
pub struct CompatibilityReport {
    pub run_id: Uuid,
    pub specs: SystemSpecs,
    pub game: GameRecord,
    pub requirements: RequirementSet,
    pub target_resolution: Resolution,
    pub analysis: String,
}

pub type AnalysisOutcome = Result<CompatibilityReport, RunFailure>;

#[derive(Debug)]
pub enum RunEvent {
    Stage(Stage),
    Finished(AnalysisOutcome),
}

/// Caller side of one running check
pub struct RunHandle {
    id: Uuid,
    events: mpsc::Receiver<RunEvent>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the run to stop at the next opportunity. It still reports an outcome.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next progress message; `None` once the run has finished and drained.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Drain progress messages and return the outcome.
    pub async fn wait(mut self) -> AnalysisOutcome {
        let mut last = Stage::Idle;
        while let Some(event) = self.events.recv().await {
            match event {
                RunEvent::Stage(stage) => last = stage,
                RunEvent::Finished(outcome) => return outcome,
            }
        }
        // The task went away without reporting (runtime shutting down).
        Err(RunFailure::new(last, FailureReason::Cancelled))
    }
}

/// Sequences probe, catalog and inference for each check.
#[derive(Clone)]
pub struct CompatibilityOrchestrator {
    probe: Arc<HardwareProbe>,
    catalog: Arc<CatalogClient>,
    backend: Arc<dyn TextInference>,
}

impl CompatibilityOrchestrator {
    pub fn new(
        probe: Arc<HardwareProbe>,
        catalog: Arc<CatalogClient>,
        backend: Arc<dyn TextInference>,
    ) -> Self {
        Self {
            probe,
            catalog,
            backend,
        }
    }

    /// Build every component from configuration. Credentials and model
    /// weights are resolved here.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(HardwareProbe::for_current_os(config.probe.command_timeout())),
            Arc::new(CatalogClient::new(&config.catalog)),
            build_backend(&config.inference),
        )
    }

    pub fn backend(&self) -> &dyn TextInference {
        self.backend.as_ref()
    }

    /// Start a check on a new task. `target` overrides the detected resolution.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, game_name: &str, target: Option<Resolution>) -> RunHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let run = Run {
            id,
            probe: Arc::clone(&self.probe),
            catalog: Arc::clone(&self.catalog),
            backend: Arc::clone(&self.backend),
            events: tx,
            cancel: cancel.clone(),
        };
        let game_name = game_name.trim().to_string();
        tokio::spawn(async move {
            let outcome = run.execute(&game_name, target).await;
            run.finish(outcome).await;
        });

        RunHandle {
            id,
            events: rx,
            cancel,
        }
    }
}

/// State owned by one spawned check
struct Run {
    id: Uuid,
    probe: Arc<HardwareProbe>,
    catalog: Arc<CatalogClient>,
    backend: Arc<dyn TextInference>,
    events: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(&self, game_name: &str, target: Option<Resolution>) -> AnalysisOutcome {
        if let Err(err) = self.backend.readiness() {
            return Err(RunFailure::new(Stage::Idle, err.into()));
        }
        if game_name.is_empty() {
            return Err(RunFailure::new(
                Stage::Idle,
                FailureReason::GameNotFound("No game name given".to_string()),
            ));
        }

        self.enter(Stage::Probing).await;
        let probe = Arc::clone(&self.probe);
        let joined = self
            .guarded(Stage::Probing, tokio::task::spawn_blocking(move || probe.probe()))
            .await?;
        let specs = match joined {
            Ok(specs) => specs,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(RunFailure::new(Stage::Probing, FailureReason::Cancelled)),
        };
        let target_resolution = target.unwrap_or(specs.resolution);

        self.enter(Stage::Searching).await;
        let game = self
            .guarded(Stage::Searching, self.catalog.search(game_name))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RunFailure::new(
                    Stage::Searching,
                    FailureReason::GameNotFound(format!(
                        "No games found matching '{}'",
                        game_name
                    )),
                )
            })?;
        debug!(run_id = %self.id, id = game.catalog_id, name = %game.name, "using first match");

        self.enter(Stage::Fetching).await;
        let requirements = self
            .guarded(Stage::Fetching, self.catalog.fetch_requirements(game.catalog_id))
            .await?
            .map_err(|err| {
                let reason = match err {
                    CatalogError::GameNotFound(_) => FailureReason::GameNotFound(format!(
                        "Could not find game data for '{}'",
                        game.name
                    )),
                    CatalogError::FetchFailed(msg) => FailureReason::RequirementsUnavailable(
                        format!("Could not fetch requirements for '{}': {}", game.name, msg),
                    ),
                };
                RunFailure::new(Stage::Fetching, reason)
            })?;

        self.enter(Stage::Formatting).await;
        let request = AnalysisRequest::compose(&specs, &requirements, target_resolution);

        self.enter(Stage::Inferring).await;
        debug!(run_id = %self.id, game = request.game_name(), backend = self.backend.name(), "requesting analysis");
        let analysis = self
            .guarded(Stage::Inferring, self.backend.analyze(&request))
            .await?
            .map_err(|err| RunFailure::new(Stage::Inferring, err.into()))?;

        Ok(CompatibilityReport {
            run_id: self.id,
            specs,
            game,
            requirements,
            target_resolution,
            analysis,
        })
    }

    async fn enter(&self, stage: Stage) {
        info!(run_id = %self.id, ?stage, "stage");
        self.emit(RunEvent::Stage(stage)).await;
    }

    /// Race one stage's work against cancellation.
    async fn guarded<T>(&self, stage: Stage, work: impl Future<Output = T>) -> Result<T, RunFailure> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(run_id = %self.id, ?stage, "cancelled");
                Err(RunFailure::new(stage, FailureReason::Cancelled))
            }
            value = work => Ok(value),
        }
    }

    async fn finish(&self, outcome: AnalysisOutcome) {
        let terminal = match &outcome {
            Ok(_) => Stage::Done,
            Err(failure) => {
                warn!(run_id = %self.id, stage = ?failure.stage, reason = %failure.reason, "check failed");
                Stage::Failed
            }
        };
        self.enter(terminal).await;
        self.emit(RunEvent::Finished(outcome)).await;
    }

    async fn emit(&self, event: RunEvent) {
        // A dropped handle just means nobody is listening any more
        if self.events.send(event).await.is_err() {
            debug!(run_id = %self.id, "run handle dropped");
        }
    }
}
